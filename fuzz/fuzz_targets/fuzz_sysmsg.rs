#![no_main]

use game_proxy::protocol::sysmsg;
use game_proxy::protocol::SysmsgMap;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let mut map = SysmsgMap::new();
    map.insert("SMT_FUZZ", 7);
    if let Ok(message) = sysmsg::parse(data, &map) {
        let _ = sysmsg::build(&message, &map);
    }
});
