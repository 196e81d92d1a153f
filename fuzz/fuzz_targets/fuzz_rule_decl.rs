#![no_main]
use docgate::{DocumentPath, Operation, Ruleset};
use libfuzzer_sys::fuzz_target;

// Arbitrary declarations must compile or be rejected, never panic
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let Ok(rules) = Ruleset::from_json(text) else {
        return;
    };

    if let Ok(path) = DocumentPath::parse("/chats/C1/messages/M9") {
        for op in Operation::ALL {
            let _ = rules.fetch_bound(&path, op);
        }
    }
});
