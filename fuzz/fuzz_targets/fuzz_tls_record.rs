#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = nbtls_tls::record::RecordHeader::parse(data);

    // Split at the first byte to exercise reassembly across deliveries.
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = (split as usize).min(rest.len());
    let mut reader = nbtls_tls::record::reassembly::RecordReader::new();
    let _ = reader.push(&rest[..split]);
    let _ = reader.push(&rest[split..]);
});
