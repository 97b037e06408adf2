#![no_main]

use game_proxy::protocol::schema::Schema;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // First line picks the layout, the rest is read as a payload
    let split = data.iter().position(|&b| b == b'\n').unwrap_or(data.len());
    let Ok(source) = std::str::from_utf8(&data[..split]) else {
        return;
    };
    let Ok(schema) = Schema::parse(&source.replace(';', "\n")) else {
        return;
    };
    let payload = data.get(split + 1..).unwrap_or(&[]);
    if let Ok(fields) = schema.read(payload) {
        let mut out = Vec::new();
        let _ = schema.write(&fields, &mut out);
    }
});
