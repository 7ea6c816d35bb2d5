#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use log2console_receivers::parser::Log4jEventCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut codec = Log4jEventCodec::with_max_frame(4096);
    let mut buf = BytesMut::from(data);
    // every successful frame consumes input, so this terminates
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        assert!(!frame.is_empty());
    }
});
