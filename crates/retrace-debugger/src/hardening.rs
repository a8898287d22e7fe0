use std::sync::Once;

use retrace_config::{init_tracing, RetraceConfig};

static PANIC_HOOK: Once = Once::new();

/// Initialize structured logging and install a panic hook that logs panics
/// before the default hook prints them.
///
/// Child engine threads catch their own panics and report them as crashes;
/// the hook still records them so the cause shows up in the logs.
pub fn init(config: &RetraceConfig) {
    init_tracing(&config.logging);
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let message = panic_message(info);
            let location = info.location().map(ToString::to_string);
            tracing::error!(
                target: "retrace.panic",
                {
                    panic.message = %message,
                    panic.location = %location.as_deref().unwrap_or("<unknown>"),
                    thread = std::thread::current().name().unwrap_or("<unnamed>"),
                },
                "panic captured"
            );
            previous(info);
        }));
    });
}

fn panic_message(info: &std::panic::PanicHookInfo<'_>) -> String {
    if let Some(message) = info.payload().downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}
