#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use tokio::runtime::Runtime;

mod utils;

fn runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("failed to build fuzz runtime")
    })
}

fuzz_target!(|data: &[u8]| {
    // Framing errors are fine; panics and hangs are not.
    let input = utils::truncate(data);
    runtime().block_on(retrace_protocol::fuzzing::read_packets(input));
});
