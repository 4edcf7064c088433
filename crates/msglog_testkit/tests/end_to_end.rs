//! A log call travels from a forwarder through a collector into storage
//! and back out of a query.

use msglog_core::QueryParams;
use msglog_format::Arg;
use msglog_protocol::{MessageSource, Priority};
use msglog_testkit::prelude::*;
use msglog_forwarder::LogDispatch;
use proptest::prelude::*;

const UID: u16 = 61_400;

#[test]
fn error_query_finds_the_flush_failure() {
    let pipeline = Pipeline::start();
    let forwarder = pipeline.forwarder("cellapp", UID, 4242);
    forwarder.register_app_id(1);

    let sent = forwarder.log(
        Priority::Info,
        "",
        MessageSource::Cpp,
        "cell %d ready",
        &[Arg::from(7)],
        None,
    );
    assert_eq!(sent, LogDispatch::Forwarded(1));
    forwarder.log(
        Priority::Error,
        "storage",
        MessageSource::Cpp,
        "%s failed with code %d",
        &["flush".into(), 5.into()],
        None,
    );
    pipeline.pump(&forwarder);

    let all = pipeline.wait_for(UID, &QueryParams::new(), 2);
    assert_eq!(all[0].message, "cell 7 ready");

    let errors = pipeline.matches(UID, &QueryParams::new().with_priorities(&[Priority::Error]));
    assert_eq!(errors.len(), 1);
    let error = &errors[0];
    assert_eq!(error.message, "flush failed with code 5");
    assert_eq!(error.component_label(), "CellApp01");
    assert_eq!(error.category, "storage");
    assert_eq!(error.pid, 4242);
    assert!(error.format_line().ends_with("[storage] flush failed with code 5"));

    let stats = pipeline.shutdown();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.registrations, 1);
}

#[test]
fn producers_stay_apart() {
    let pipeline = Pipeline::start();
    let cellapp = pipeline.forwarder("cellapp", UID + 1, 100);
    let baseapp = pipeline.forwarder("baseapp", UID + 1, 200);

    cellapp.log(Priority::Info, "", MessageSource::Cpp, "from cell", &[], None);
    baseapp.log(Priority::Warning, "", MessageSource::Script, "from base", &[], None);
    pipeline.pump(&cellapp);
    pipeline.pump(&baseapp);

    let all = pipeline.wait_for(UID + 1, &QueryParams::new(), 2);
    assert_eq!(all.len(), 2);

    let scripts = pipeline.matches(UID + 1, &QueryParams::new().with_pid(200, false));
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].message, "from base");
    assert_eq!(scripts[0].source, MessageSource::Script);
    assert_eq!(scripts[0].component_label(), "BaseApp");
}

#[test]
fn rolled_log_keeps_every_entry() {
    let pipeline = Pipeline::start();
    let forwarder = pipeline.forwarder("dbapp", UID + 2, 300);

    forwarder.log(Priority::Info, "", MessageSource::Cpp, "before", &[], None);
    pipeline.pump(&forwarder);
    pipeline.wait_for(UID + 2, &QueryParams::new(), 1);
    pipeline.roll();
    forwarder.log(Priority::Info, "", MessageSource::Cpp, "after", &[], None);
    pipeline.pump(&forwarder);

    let messages: Vec<String> = pipeline
        .wait_for(UID + 2, &QueryParams::new(), 2)
        .into_iter()
        .map(|r| r.message)
        .collect();
    assert_eq!(messages, vec!["before", "after"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn stored_messages_replay_like_printf((format, args, expected) in message_strategy()) {
        let mut log = TestLog::new();
        let producer = Producer::new("cellapp", [10, 0, 0, 9], 1000, 1);
        log.write(1000, &producer, Priority::Info, &format, &args);
        prop_assert_eq!(log.messages(1000), vec![expected]);
    }
}
