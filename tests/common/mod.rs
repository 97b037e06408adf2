//! Shared fixtures for the integration tests

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use game_proxy::dispatch::{Dispatch, DispatchSettings};
use game_proxy::mods::{FactoryLoader, ModCatalog, Package};
use game_proxy::protocol::{
    DefinitionCatalog, MemoryProvider, PacketMap, ProtocolInfo, SysmsgMap,
};

pub const PROTOCOL: u32 = 381_200;

pub const C_LOGIN: u16 = 100;
pub const S_CHAT: u16 = 200;
pub const C_CHAT: u16 = 201;

/// Provider knowing C_LOGIN (v1-v2), S_CHAT (v1) and C_CHAT (v1)
pub fn provider() -> MemoryProvider {
    let mut catalog = DefinitionCatalog::new();
    catalog
        .add_definition("C_LOGIN", 1, "string name\n")
        .expect("C_LOGIN.1");
    catalog
        .add_definition("C_LOGIN", 2, "string name\nuint32 server\n")
        .expect("C_LOGIN.2");
    catalog
        .add_definition("S_CHAT", 1, "uint32 channel\nstring message\n")
        .expect("S_CHAT.1");
    catalog
        .add_definition("C_CHAT", 1, "uint32 channel\nstring message\n")
        .expect("C_CHAT.1");

    let mut packets = PacketMap::new();
    packets.insert("C_LOGIN", C_LOGIN);
    packets.insert("S_CHAT", S_CHAT);
    packets.insert("C_CHAT", C_CHAT);

    let mut sysmsgs = SysmsgMap::new();
    sysmsgs.insert("SMT_GENERAL_NOT_IN_THE_WORLD", 13);

    let info = ProtocolInfo {
        protocol: PROTOCOL,
        region: "eu".into(),
        major_patch: 100,
        minor_patch: 2,
        sysmsg_version: 100,
    };
    MemoryProvider::new(catalog.shared()).with_protocol(info, packets, sysmsgs)
}

/// Dispatch with the fixture protocol already negotiated
pub fn negotiated() -> Dispatch {
    dispatch_with(FactoryLoader::new(), &[], Some(PROTOCOL))
}

pub fn dispatch_with(
    loader: FactoryLoader,
    packages: &[Package],
    preset_version: Option<u32>,
) -> Dispatch {
    let mut catalog = ModCatalog::new();
    for package in packages {
        catalog.insert(package.clone());
    }
    Dispatch::new(
        Arc::new(provider()),
        catalog.shared(),
        Arc::new(loader),
        DispatchSettings {
            preset_version,
            ..DispatchSettings::default()
        },
    )
}

/// Encode a packet with the fixture protocol
pub fn encode(dispatch: &Dispatch, name: &str, version: u32, data: serde_json::Value) -> Vec<u8> {
    let codec = dispatch.codec().expect("negotiated");
    codec
        .write(name, version, data.as_object().expect("object"))
        .expect("encodable")
}
