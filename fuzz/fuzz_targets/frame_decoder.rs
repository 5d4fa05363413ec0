#![no_main]

use libfuzzer_sys::fuzz_target;
use tab_broker::decoder::FrameDecoder;

fuzz_target!(|data: &[u8]| {
    // The first byte picks the feed chunking, so frame fields landing on
    // feed boundaries get exercised as much as the fields themselves.
    let Some((&step, rest)) = data.split_first() else {
        return;
    };
    let step = (step as usize % 37) + 1;

    let mut decoder = FrameDecoder::new();
    let mut bytes = rest.to_vec();
    for chunk in bytes.chunks_mut(step) {
        // rejected input must simply stop the stream, never panic
        if decoder.feed(chunk, |_| Ok(())).is_err() {
            return;
        }
    }
});
