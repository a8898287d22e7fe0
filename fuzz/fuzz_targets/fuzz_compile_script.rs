#![no_main]

use libfuzzer_sys::fuzz_target;

mod utils;

fuzz_target!(|data: &[u8]| {
    if let Some(source) = utils::truncate_utf8(data) {
        retrace_engine::fuzzing::compile_script(source.as_bytes());
    }
});
