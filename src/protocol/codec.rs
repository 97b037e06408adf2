//! Protocol codec seam.
//!
//! The dispatch pipeline never touches packet layouts directly. It asks a
//! [`ProtocolCodec`] to turn `(opcode, version, bytes)` into an [`Event`] and
//! back, and a [`ProtocolProvider`] to open the codec for a negotiated
//! protocol version.
//!
//! [`DataDirProvider`] is the shipped provider. It reads a data directory:
//!
//! ```text
//! data/
//!   versions.toml              [[version]] protocol/region/patch metadata
//!   maps/protocol.<v>.map      NAME OPCODE per line
//!   maps/sysmsg.<v>.map        NAME CODE per line
//!   definitions/NAME.<v>.def   see `protocol::schema`
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::core::packet::{self, PacketFlags};
use crate::error::{constants, ProxyError, Result};
use crate::protocol::definitions::{DefinitionCatalog, SharedDefinitions};

/// A decoded packet as seen by hooks
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    version: u32,
    data: Map<String, Value>,
    flags: PacketFlags,
}

impl Event {
    pub fn new(name: impl Into<String>, version: u32, data: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            version,
            data,
            flags: PacketFlags::default(),
        }
    }

    /// Packet name, e.g. `S_CHAT`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Definition version the event was decoded with
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.data
    }

    pub fn into_data(self) -> Map<String, Value> {
        self.data
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Set a field, returning the event for chaining
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
        self.data.insert(field.to_string(), value.into());
        self
    }

    /// Pipeline flags at the moment this event was handed to the hook
    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub(crate) fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Bidirectional name <-> numeric code table
#[derive(Debug, Clone, Default)]
pub struct NameMap<C> {
    by_name: HashMap<String, C>,
    by_code: HashMap<C, String>,
}

impl<C> NameMap<C>
where
    C: Copy + Eq + Hash + FromStr,
{
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_code: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, code: C) {
        let name = name.into();
        self.by_code.insert(code, name.clone());
        self.by_name.insert(name, code);
    }

    pub fn code(&self, name: &str) -> Option<C> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, code: C) -> Option<&str> {
        self.by_code.get(&code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Parse `NAME CODE` (or `NAME = CODE`) lines; `#` starts a comment
    pub fn parse(source: &str) -> Result<Self> {
        let mut map = Self::new();
        for (lineno, raw) in source.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line
                .split(|c: char| c.is_whitespace() || c == '=')
                .filter(|s| !s.is_empty());
            let (Some(name), Some(code), None) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(ProxyError::Schema(format!(
                    "map line {}: expected 'NAME CODE', got '{line}'",
                    lineno + 1
                )));
            };
            let code = code.parse::<C>().map_err(|_| {
                ProxyError::Schema(format!("map line {}: invalid code '{code}'", lineno + 1))
            })?;
            map.insert(name, code);
        }
        Ok(map)
    }
}

/// Packet opcode table
pub type PacketMap = NameMap<u16>;

/// System message code table
pub type SysmsgMap = NameMap<u32>;

/// Region and patch metadata derived from a protocol version
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProtocolInfo {
    pub protocol: u32,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub major_patch: u32,
    #[serde(default)]
    pub minor_patch: u32,
    #[serde(default)]
    pub sysmsg_version: u32,
}

impl ProtocolInfo {
    /// Bare metadata for a version with no entry in `versions.toml`
    pub fn unknown(protocol: u32) -> Self {
        Self {
            protocol,
            region: String::new(),
            major_patch: 0,
            minor_patch: 0,
            sysmsg_version: 0,
        }
    }

    /// Human readable patch, e.g. `92.04`
    pub fn patch(&self) -> String {
        format!("{}.{:02}", self.major_patch, self.minor_patch)
    }
}

/// Reads and writes packets of one negotiated protocol version
pub trait ProtocolCodec: Send + Sync {
    fn info(&self) -> &ProtocolInfo;

    fn packets(&self) -> &PacketMap;

    fn sysmsgs(&self) -> &SysmsgMap;

    /// Newest known definition version for a packet name
    fn latest_version(&self, name: &str) -> Option<u32>;

    /// Decode a full packet buffer (header included)
    fn read(&self, opcode: u16, version: u32, buf: &[u8]) -> Result<Event>;

    /// Encode a full packet buffer (header included)
    fn write(&self, name: &str, version: u32, data: &Map<String, Value>) -> Result<Vec<u8>>;
}

/// Opens codecs for protocol versions and owns the shared definitions
pub trait ProtocolProvider: Send + Sync {
    fn open(&self, version: u32) -> Result<Arc<dyn ProtocolCodec>>;

    fn definitions(&self) -> SharedDefinitions;
}

/// Caller-supplied layout for a hook that bypasses the definition catalog
pub trait CustomDefinition: Send + Sync + fmt::Debug {
    /// Decode the payload (bytes after the header)
    fn read(&self, payload: &[u8]) -> Result<Map<String, Value>>;

    /// Encode a payload (bytes after the header)
    fn write(&self, data: &Map<String, Value>) -> Result<Vec<u8>>;
}

/// Codec backed by name maps and the shared definition catalog
pub struct SchemaProtocol {
    info: ProtocolInfo,
    packets: PacketMap,
    sysmsgs: SysmsgMap,
    definitions: SharedDefinitions,
}

impl SchemaProtocol {
    pub fn new(
        info: ProtocolInfo,
        packets: PacketMap,
        sysmsgs: SysmsgMap,
        definitions: SharedDefinitions,
    ) -> Self {
        Self {
            info,
            packets,
            sysmsgs,
            definitions,
        }
    }

    fn catalog(&self) -> Result<std::sync::RwLockReadGuard<'_, DefinitionCatalog>> {
        self.definitions
            .read()
            .map_err(|_| ProxyError::Internal(constants::ERR_DEFINITIONS_LOCK.into()))
    }
}

impl ProtocolCodec for SchemaProtocol {
    fn info(&self) -> &ProtocolInfo {
        &self.info
    }

    fn packets(&self) -> &PacketMap {
        &self.packets
    }

    fn sysmsgs(&self) -> &SysmsgMap {
        &self.sysmsgs
    }

    fn latest_version(&self, name: &str) -> Option<u32> {
        self.catalog().ok()?.latest(name)
    }

    fn read(&self, opcode: u16, version: u32, buf: &[u8]) -> Result<Event> {
        let name = self
            .packets
            .name(opcode)
            .ok_or_else(|| ProxyError::UnknownPacket(format!("opcode {opcode}")))?;
        let schema = self
            .catalog()?
            .get(name, version)
            .ok_or_else(|| ProxyError::DefinitionNotFound {
                name: name.to_string(),
                version,
            })?;
        let data = schema.read(packet::payload(buf))?;
        Ok(Event::new(name, version, data))
    }

    fn write(&self, name: &str, version: u32, data: &Map<String, Value>) -> Result<Vec<u8>> {
        let opcode = self
            .packets
            .code(name)
            .ok_or_else(|| ProxyError::UnknownPacket(name.to_string()))?;
        let schema = self
            .catalog()?
            .get(name, version)
            .ok_or_else(|| ProxyError::DefinitionNotFound {
                name: name.to_string(),
                version,
            })?;
        let mut payload = Vec::new();
        schema.write(data, &mut payload)?;
        packet::build(opcode, &payload)
    }
}

#[derive(Debug, Deserialize)]
struct VersionsFile {
    #[serde(default)]
    version: Vec<ProtocolInfo>,
}

/// Provider reading maps and definitions from a data directory
pub struct DataDirProvider {
    root: PathBuf,
    versions: HashMap<u32, ProtocolInfo>,
    definitions: SharedDefinitions,
    opened: Mutex<HashMap<u32, Arc<dyn ProtocolCodec>>>,
}

impl DataDirProvider {
    /// Load `versions.toml` and every definition under `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        let versions_path = root.join("versions.toml");
        let versions = if versions_path.exists() {
            let content = std::fs::read_to_string(&versions_path)?;
            let file: VersionsFile = toml::from_str(&content)
                .map_err(|e| ProxyError::ConfigError(format!("versions.toml: {e}")))?;
            file.version
                .into_iter()
                .map(|info| (info.protocol, info))
                .collect()
        } else {
            HashMap::new()
        };

        let mut catalog = DefinitionCatalog::new();
        let defs_dir = root.join("definitions");
        if defs_dir.is_dir() {
            catalog.load_dir(&defs_dir)?;
        }

        info!(
            root = %root.display(),
            versions = versions.len(),
            definitions = catalog.len(),
            "Protocol data loaded"
        );

        Ok(Self {
            root,
            versions,
            definitions: catalog.shared(),
            opened: Mutex::new(HashMap::new()),
        })
    }

    fn read_map<C>(&self, file: &str) -> Result<Option<NameMap<C>>>
    where
        C: Copy + Eq + Hash + FromStr,
    {
        let path = self.root.join("maps").join(file);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        NameMap::parse(&content).map(Some)
    }
}

impl ProtocolProvider for DataDirProvider {
    fn open(&self, version: u32) -> Result<Arc<dyn ProtocolCodec>> {
        let mut opened = self
            .opened
            .lock()
            .map_err(|_| ProxyError::Internal(constants::ERR_SESSION_LOCK.into()))?;
        if let Some(codec) = opened.get(&version) {
            return Ok(codec.clone());
        }

        let packets = self
            .read_map::<u16>(&format!("protocol.{version}.map"))?
            .ok_or_else(|| ProxyError::Codec(format!("no opcode map for protocol {version}")))?;

        let info = self
            .versions
            .get(&version)
            .cloned()
            .unwrap_or_else(|| ProtocolInfo::unknown(version));

        let sysmsgs = self
            .read_map::<u32>(&format!("sysmsg.{}.map", info.sysmsg_version))?
            .unwrap_or_default();

        debug!(
            version,
            packets = packets.len(),
            sysmsgs = sysmsgs.len(),
            "Opened protocol codec"
        );

        let codec: Arc<dyn ProtocolCodec> = Arc::new(SchemaProtocol::new(
            info,
            packets,
            sysmsgs,
            self.definitions.clone(),
        ));
        opened.insert(version, codec.clone());
        Ok(codec)
    }

    fn definitions(&self) -> SharedDefinitions {
        self.definitions.clone()
    }
}

/// Provider holding its protocol tables in memory
pub struct MemoryProvider {
    protocols: HashMap<u32, Arc<dyn ProtocolCodec>>,
    definitions: SharedDefinitions,
}

impl MemoryProvider {
    pub fn new(definitions: SharedDefinitions) -> Self {
        Self {
            protocols: HashMap::new(),
            definitions,
        }
    }

    /// Add a protocol version backed by the shared definitions
    pub fn with_protocol(
        mut self,
        info: ProtocolInfo,
        packets: PacketMap,
        sysmsgs: SysmsgMap,
    ) -> Self {
        let version = info.protocol;
        let codec = SchemaProtocol::new(info, packets, sysmsgs, self.definitions.clone());
        self.protocols.insert(version, Arc::new(codec));
        self
    }
}

impl ProtocolProvider for MemoryProvider {
    fn open(&self, version: u32) -> Result<Arc<dyn ProtocolCodec>> {
        self.protocols
            .get(&version)
            .cloned()
            .ok_or_else(|| ProxyError::Codec(format!("unsupported protocol {version}")))
    }

    fn definitions(&self) -> SharedDefinitions {
        self.definitions.clone()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_provider_rejects_unknown_version() {
        let provider = MemoryProvider::new(DefinitionCatalog::new().shared()).with_protocol(
            ProtocolInfo::unknown(7),
            PacketMap::new(),
            SysmsgMap::new(),
        );
        assert_eq!(provider.open(7).unwrap().info().protocol, 7);
        assert!(matches!(provider.open(8), Err(ProxyError::Codec(_))));
    }

    #[test]
    fn test_name_map_parses_both_separators() {
        let map = PacketMap::parse("C_LOGIN 100\nS_CHAT = 200 # comment\n\n").unwrap();
        assert_eq!(map.code("C_LOGIN"), Some(100));
        assert_eq!(map.name(200), Some("S_CHAT"));
        assert!(PacketMap::parse("C_LOGIN 70000").is_err());
    }

    #[test]
    fn test_data_dir_provider_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("maps")).unwrap();
        std::fs::create_dir_all(dir.path().join("definitions")).unwrap();
        std::fs::write(
            dir.path().join("versions.toml"),
            "[[version]]\nprotocol = 500\nregion = \"eu\"\nmajor_patch = 92\nminor_patch = 4\nsysmsg_version = 3\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("maps/protocol.500.map"), "S_CHAT 200\n").unwrap();
        std::fs::write(dir.path().join("maps/sysmsg.3.map"), "SMT_HELLO 12\n").unwrap();
        std::fs::write(
            dir.path().join("definitions/S_CHAT.1.def"),
            "uint32 channel\nstring text\n",
        )
        .unwrap();

        let provider = DataDirProvider::new(dir.path()).unwrap();
        let codec = provider.open(500).unwrap();
        assert_eq!(codec.info().patch(), "92.04");
        assert_eq!(codec.sysmsgs().code("SMT_HELLO"), Some(12));

        let data = json!({"channel": 1, "text": "hi"});
        let buf = codec.write("S_CHAT", 1, data.as_object().unwrap()).unwrap();
        assert_eq!(packet::opcode(&buf), Some(200));
        let event = codec.read(200, 1, &buf).unwrap();
        assert_eq!(event.name(), "S_CHAT");
        assert_eq!(Value::Object(event.into_data()), data);

        // Second open hits the cache
        let again = provider.open(500).unwrap();
        assert!(Arc::ptr_eq(&codec, &again));
    }

    #[test]
    fn test_open_unknown_version_fails() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DataDirProvider::new(dir.path()).unwrap();
        assert!(matches!(provider.open(1), Err(ProxyError::Codec(_))));
    }
}
