#![no_main]
use arbitrary::Arbitrary;
use docgate::{presets, DecisionEngine, Document, MemoryStore, Operation, Request, Value};
use libfuzzer_sys::fuzz_target;
use std::sync::{Arc, OnceLock};

#[derive(Arbitrary, Debug)]
struct Input {
    op: u8,
    path: String,
    subject: Option<String>,
    participants: Vec<i64>,
}

fn engine() -> &'static DecisionEngine {
    static ENGINE: OnceLock<DecisionEngine> = OnceLock::new();
    ENGINE.get_or_init(|| {
        let store = MemoryStore::new();
        store
            .insert("/chats/C1", Document::new().with("participants", vec![42i64, 7]))
            .unwrap();
        DecisionEngine::new(Arc::new(presets::chat_rules().unwrap()), Arc::new(store))
    })
}

fuzz_target!(|input: Input| {
    let op = Operation::ALL[input.op as usize % Operation::ALL.len()];
    let mut request = Request::new(op, input.path)
        .with_resource(Document::new().with("participants", Value::from(input.participants)));
    if let Some(subject) = input.subject.clone() {
        request = request.with_subject(subject);
    }

    let decision = engine().evaluate(&request);

    // never allow without a numeric subject
    if decision.allow {
        let subject = input.subject.unwrap_or_default();
        assert!(subject.parse::<i64>().is_ok(), "allowed subject {:?}", subject);
    }
    assert_eq!(decision.allow, decision.reason.is_none());
});
