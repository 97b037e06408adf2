use std::sync::Arc;

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use game_proxy::core::codec::PacketFramer;
use game_proxy::core::packet;
use game_proxy::dispatch::{
    DefinitionVersion, Dispatch, DispatchSettings, HookAction, HookCallback, HookOptions, WILDCARD,
};
use game_proxy::mods::{FactoryLoader, ModCatalog};
use game_proxy::protocol::{
    DefinitionCatalog, MemoryProvider, PacketMap, ProtocolInfo, SysmsgMap,
};
use serde_json::json;
use tokio_util::codec::{Decoder, Encoder};

const PROTOCOL: u32 = 381_200;
const S_CHAT: u16 = 200;

#[allow(clippy::unwrap_used)]
fn dispatch() -> Dispatch {
    let mut catalog = DefinitionCatalog::new();
    catalog
        .add_definition("S_CHAT", 1, "uint32 channel\nuint64 author\nstring message\n")
        .unwrap();
    let mut packets = PacketMap::new();
    packets.insert("S_CHAT", S_CHAT);
    let provider = MemoryProvider::new(catalog.shared()).with_protocol(
        ProtocolInfo::unknown(PROTOCOL),
        packets,
        SysmsgMap::new(),
    );
    Dispatch::new(
        Arc::new(provider),
        ModCatalog::new().shared(),
        Arc::new(FactoryLoader::new()),
        DispatchSettings {
            preset_version: Some(PROTOCOL),
            ..DispatchSettings::default()
        },
    )
}

#[allow(clippy::unwrap_used)]
fn chat_packet(dispatch: &Dispatch) -> Vec<u8> {
    dispatch
        .codec()
        .unwrap()
        .write(
            "S_CHAT",
            1,
            json!({"channel": 4, "author": 1_000_017, "message": "the quick brown fox"})
                .as_object()
                .unwrap(),
        )
        .unwrap()
}

#[allow(clippy::unwrap_used)]
fn bench_handle(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_handle");

    let plain = dispatch();
    let buf = chat_packet(&plain);
    group.throughput(Throughput::Bytes(buf.len() as u64));
    group.bench_function("no_hooks", |b| {
        b.iter_batched(
            || buf.clone(),
            |buf| plain.handle(buf, true, false),
            BatchSize::SmallInput,
        )
    });

    for hooks in [1usize, 8, 32] {
        let raw = dispatch();
        for order in 0..hooks {
            raw.hook(
                "bench",
                if order % 2 == 0 { WILDCARD } else { "S_CHAT" },
                DefinitionVersion::Raw,
                HookOptions::new().order(order as i32),
                HookCallback::raw(|_| Ok(HookAction::NoOpinion)),
            )
            .unwrap();
        }
        group.bench_function(format!("raw_{hooks}_hooks"), |b| {
            b.iter_batched(
                || buf.clone(),
                |buf| raw.handle(buf, true, false),
                BatchSize::SmallInput,
            )
        });
    }

    let decoded = dispatch();
    decoded
        .hook(
            "bench",
            "S_CHAT",
            1,
            HookOptions::new(),
            HookCallback::event(|event| {
                let mut event = event.clone();
                event.set("message", "rewritten");
                Ok(HookAction::Mutate(event))
            }),
        )
        .unwrap();
    group.bench_function("decode_mutate_encode", |b| {
        b.iter_batched(
            || buf.clone(),
            |buf| decoded.handle(buf, true, false),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_framer(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_framer");
    for size in [16usize, 512, 8192] {
        let pkt = packet::build(S_CHAT, &vec![0xAB; size]).unwrap();
        group.throughput(Throughput::Bytes(pkt.len() as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || pkt.clone(),
                |pkt| {
                    let mut dst = BytesMut::with_capacity(size + 8);
                    PacketFramer.encode(pkt, &mut dst).unwrap();
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter_batched(
                || BytesMut::from(&pkt[..]),
                |mut src| PacketFramer.decode(&mut src).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_handle, bench_framer);
criterion_main!(benches);
