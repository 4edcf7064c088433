//! Queries over logs written by `LogStorage`.

use msglog_core::{
    CoreError, Direction, EntryAddress, HostResolver, Interpolation, LogReader, LogStorage, LogTime,
    QueryItem, QueryParams, StorageConfig,
};
use msglog_format::{Arg, FormatString};
use msglog_protocol::{ComponentRegistration, LogMessage, Metadata, MessageSource, Priority};
use std::net::{Ipv4Addr, SocketAddr};
use tempfile::TempDir;

const UID: u16 = 61_100;

struct Hosts;

impl HostResolver for Hosts {
    fn resolve(&self, addr: Ipv4Addr) -> Option<String> {
        Some(format!("host{}", addr.octets()[3]))
    }
}

struct Fixture {
    dir: TempDir,
    storage: LogStorage,
}

impl Fixture {
    fn new(segment_size: u64) -> Self {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::new(dir.path()).with_segment_size(segment_size);
        let storage = LogStorage::open(config).unwrap().with_resolver(Hosts);
        Self { dir, storage }
    }

    fn write(
        &mut self,
        secs: i64,
        from: Producer<'_>,
        priority: Priority,
        fmt: &str,
        args: &[Arg],
    ) -> EntryAddress {
        let parsed = FormatString::parse(fmt).unwrap();
        let stream = parsed.stream_args(args).unwrap();
        let message = LogMessage::new(priority, fmt, stream).with_category(from.category);
        self.storage
            .write_log_at(LogTime::new(secs, 0), from.addr, &from.registration, &message)
            .unwrap()
    }

    /// Writes `n` INFO entries `"line %d"` one second apart from t=1000.
    fn lines(&mut self, n: i64) -> Vec<EntryAddress> {
        (0..n)
            .map(|i| self.write(1000 + i, cellapp(), Priority::Info, "line %d", &[Arg::from(i)]))
            .collect()
    }

    fn reader(&self) -> LogReader {
        LogReader::open(self.dir.path()).unwrap()
    }
}

#[derive(Clone)]
struct Producer<'a> {
    addr: SocketAddr,
    registration: ComponentRegistration,
    category: &'a str,
}

fn producer(name: &str, host: u8, pid: u32) -> Producer<'static> {
    Producer {
        addr: SocketAddr::from(([10, 0, 0, host], 40_000)),
        registration: ComponentRegistration::new(name, UID, pid),
        category: "",
    }
}

fn cellapp() -> Producer<'static> {
    producer("cellapp", 1, 100)
}

fn messages(reader: &LogReader, params: &QueryParams) -> Vec<String> {
    let log = reader.user_log(UID).unwrap();
    reader
        .query(&log, params)
        .unwrap()
        .map(|item| match item.unwrap() {
            QueryItem::Match(r) => r.message,
            QueryItem::Context(r) => format!("({})", r.message),
            QueryItem::Separator => "--".to_string(),
        })
        .collect()
}

fn line_texts(range: impl Iterator<Item = i64>) -> Vec<String> {
    range.map(|i| format!("line {i}")).collect()
}

#[test]
fn full_range_across_segments_both_directions() {
    // about three entries per segment
    let mut fx = Fixture::new(120);
    let addrs = fx.lines(20);
    let segments: std::collections::BTreeSet<_> = addrs.iter().map(|a| a.suffix.clone()).collect();
    assert!(segments.len() >= 5, "expected several segments, got {}", segments.len());

    let reader = fx.reader();
    assert_eq!(messages(&reader, &QueryParams::new()), line_texts(0..20));
    assert_eq!(
        messages(&reader, &QueryParams::new().with_direction(Direction::Backwards)),
        line_texts((0..20).rev())
    );
}

#[test]
fn end_address_past_segment_end_stays_in_that_segment() {
    let mut fx = Fixture::new(120);
    let addrs = fx.lines(9);
    let first = addrs[0].suffix.clone();
    let len = addrs.iter().filter(|a| a.suffix == first).count();
    assert!(len < addrs.len());
    let reader = fx.reader();

    let past_end = EntryAddress::new(&first, len as u32);
    let params = QueryParams::new().with_end_address(past_end.clone());
    assert_eq!(messages(&reader, &params), line_texts(0..len as i64));

    let backwards = params.with_direction(Direction::Backwards);
    assert_eq!(messages(&reader, &backwards), line_texts((0..len as i64).rev()));

    let from_second = QueryParams::new()
        .with_start_address(addrs[1].clone())
        .with_end_address(past_end);
    assert_eq!(messages(&reader, &from_second), line_texts(1..len as i64));
}

#[test]
fn start_address_with_earlier_end_time_swaps() {
    let mut fx = Fixture::new(120);
    let addrs = fx.lines(6);
    let reader = fx.reader();

    let params = QueryParams::new()
        .with_start_address(addrs[4].clone())
        .with_time_range(LogTime::BEGIN, LogTime::new(1001, 0));
    assert_eq!(messages(&reader, &params), line_texts((1..5).rev()));
}

#[test]
fn time_range_selects_inclusive_bounds() {
    let mut fx = Fixture::new(120);
    fx.lines(10);
    let reader = fx.reader();

    let params = QueryParams::new().with_time_range(LogTime::new(1003, 0), LogTime::new(1006, 0));
    assert_eq!(messages(&reader, &params), line_texts(3..7));
}

#[test]
fn inverted_range_swaps_and_iterates_from_requested_start() {
    let mut fx = Fixture::new(120);
    fx.lines(10);
    let reader = fx.reader();
    let log = reader.user_log(UID).unwrap();

    let params = QueryParams::new().with_time_range(LogTime::new(1006, 0), LogTime::new(1003, 0));
    let query = reader.query(&log, &params).unwrap();
    assert!(query.range().is_swapped());
    assert_eq!(query.direction(), Direction::Backwards);
    assert_eq!(messages(&reader, &params), line_texts((3..7).rev()));
}

#[test]
fn context_follows_iteration_order_after_swap() {
    let mut fx = Fixture::new(120);
    for i in 0..12 {
        let priority = if i == 3 || i == 9 { Priority::Error } else { Priority::Info };
        fx.write(1000 + i, cellapp(), priority, "line %d", &[Arg::from(i)]);
    }
    let reader = fx.reader();

    let forwards = QueryParams::new()
        .with_priorities(&[Priority::Error])
        .with_context(1);
    assert_eq!(
        messages(&reader, &forwards),
        ["(line 2)", "line 3", "(line 4)", "--", "(line 8)", "line 9", "(line 10)"]
    );

    let reversed = forwards.with_time_range(LogTime::new(1011, 0), LogTime::new(1000, 0));
    assert_eq!(
        messages(&reader, &reversed),
        ["(line 10)", "line 9", "(line 8)", "--", "(line 4)", "line 3", "(line 2)"]
    );
}

#[test]
fn adjacent_context_groups_merge() {
    let mut fx = Fixture::new(4096);
    for i in 0..6 {
        let priority = if i == 1 || i == 3 { Priority::Error } else { Priority::Info };
        fx.write(1000 + i, cellapp(), priority, "line %d", &[Arg::from(i)]);
    }
    let params = QueryParams::new().with_priorities(&[Priority::Error]).with_context(1);
    assert_eq!(
        messages(&fx.reader(), &params),
        ["(line 0)", "line 1", "(line 2)", "line 3", "(line 4)"]
    );
}

#[test]
fn seek_boundaries() {
    let mut fx = Fixture::new(120);
    let addrs = fx.lines(9);
    let reader = fx.reader();
    let log = reader.user_log(UID).unwrap();
    let params = QueryParams::new().with_time_range(LogTime::new(1002, 0), LogTime::new(1005, 0));
    let mut query = reader.query(&log, &params).unwrap();
    let range = query.range_mut();

    assert_eq!(range.get_progress(), (0, 4));

    // one past the last entry in the range: exhausted, not an error
    range.seek(&addrs[6], false).unwrap();
    assert!(range.get_next_entry().unwrap().is_none());
    assert_eq!(range.tell(), None);

    // before the range start
    assert!(matches!(
        range.seek(&addrs[1], false),
        Err(CoreError::AddressOutOfRange { .. })
    ));
    assert!(matches!(
        range.seek(&EntryAddress::new("19990101000000", 0), false),
        Err(CoreError::UnknownSuffix { .. })
    ));

    range.seek(&addrs[3], true).unwrap();
    assert_eq!(range.tell().as_ref(), Some(&addrs[4]));
    let (addr, entry) = range.get_next_entry().unwrap().unwrap();
    assert_eq!(addr, addrs[4]);
    assert_eq!(entry.time, LogTime::new(1004, 0));
    assert_eq!(range.get_progress(), (3, 4));

    assert!(range.step(Direction::Backwards));
    assert_eq!(range.tell().as_ref(), Some(&addrs[4]));
    assert_eq!(range.entries_between(&addrs[0], &addrs[8]).unwrap(), 8);
    assert_eq!(range.entries_between(&addrs[7], &addrs[2]).unwrap(), 5);
}

#[test]
fn args_follow_the_returned_entry() {
    let mut fx = Fixture::new(4096);
    fx.write(1000, cellapp(), Priority::Info, "%s", &[Arg::from("first")]);
    fx.write(1001, cellapp(), Priority::Info, "%s", &[Arg::from("second")]);
    let reader = fx.reader();
    let log = reader.user_log(UID).unwrap();
    let mut query = reader.query(&log, &QueryParams::new()).unwrap();
    let range = query.range_mut();

    let fmt = FormatString::parse("%s").unwrap();
    range.get_next_entry().unwrap().unwrap();
    assert_eq!(fmt.interpolate_to_string(&range.args().unwrap()).unwrap(), "first");
    range.get_next_entry().unwrap().unwrap();
    assert_eq!(fmt.interpolate_to_string(&range.args().unwrap()).unwrap(), "second");
}

#[test]
fn resume_picks_up_new_segments() {
    let mut fx = Fixture::new(120);
    fx.lines(4);
    let reader = fx.reader();
    let log = reader.user_log(UID).unwrap();
    let mut query = reader.query(&log, &QueryParams::new()).unwrap();
    let first: Vec<_> = query.by_ref().map(|i| i.unwrap().result().unwrap().message.clone()).collect();
    assert_eq!(first, line_texts(0..4));

    for i in 4..10 {
        fx.write(1000 + i, cellapp(), Priority::Info, "more %d", &[Arg::from(i)]);
    }
    query.resume().unwrap();
    let rest: Vec<_> = query.map(|i| i.unwrap().result().unwrap().message.clone()).collect();
    assert_eq!(rest, (4..10).map(|i| format!("more {i}")).collect::<Vec<_>>());
}

#[test]
fn periods() {
    let mut fx = Fixture::new(4096);
    fx.lines(10);
    let reader = fx.reader();
    let at = |secs| QueryParams::new().with_time_range(LogTime::new(secs, 0), LogTime::END);

    assert_eq!(messages(&reader, &at(1004).with_period("+2")), line_texts(4..7));
    assert_eq!(messages(&reader, &at(1004).with_period("-2")), line_texts((2..5).rev()));
    assert_eq!(messages(&reader, &at(1004).with_period("1")), line_texts(3..6));
    assert_eq!(messages(&reader, &at(1007).with_period("to present")), line_texts(7..10));
    assert_eq!(
        messages(&reader, &at(1002).with_period("to beginning")),
        line_texts((0..3).rev())
    );
    // relative to the first entry when starting at the beginning of time
    assert_eq!(messages(&reader, &QueryParams::new().with_period("+1")), line_texts(0..2));

    let log = reader.user_log(UID).unwrap();
    assert!(matches!(
        reader.query(&log, &QueryParams::new().with_period("soon")),
        Err(CoreError::InvalidQuery { .. })
    ));
}

#[test]
fn component_filters() {
    let mut fx = Fixture::new(4096);
    let base = producer("baseapp", 2, 200);
    fx.write(1000, cellapp(), Priority::Info, "from cell", &[]);
    fx.write(1001, base.clone(), Priority::Info, "from base", &[]);
    fx.storage.set_app_id(base.addr, 3).unwrap();
    fx.write(1002, base, Priority::Info, "base again", &[]);
    let reader = fx.reader();

    let by_host = QueryParams::new().with_host("host2", false);
    assert_eq!(messages(&reader, &by_host), ["from base", "base again"]);
    let not_host = QueryParams::new().with_host("host2", true);
    assert_eq!(messages(&reader, &not_host), ["from cell"]);

    assert_eq!(messages(&reader, &QueryParams::new().with_pid(100, false)), ["from cell"]);
    assert_eq!(messages(&reader, &QueryParams::new().with_pid(100, true)), ["from base", "base again"]);
    assert_eq!(messages(&reader, &QueryParams::new().with_app_id(3, false)), ["from base", "base again"]);

    let baseapp = reader.component_type_id("baseapp").unwrap();
    assert_eq!(
        messages(&reader, &QueryParams::new().with_procs(1 << baseapp)),
        ["from base", "base again"]
    );

    let log = reader.user_log(UID).unwrap();
    assert!(matches!(
        reader.query(&log, &QueryParams::new().with_host("nowhere", false)),
        Err(CoreError::UnknownHost { .. })
    ));
}

#[test]
fn category_source_and_text_filters() {
    let mut fx = Fixture::new(4096);
    let mut physics = cellapp();
    physics.category = "physics";
    fx.write(1000, physics, Priority::Info, "Step took %d ms", &[Arg::from(12)]);
    fx.write(1001, cellapp(), Priority::Info, "step skipped", &[]);
    let message = LogMessage::new(Priority::Info, "from script", Vec::new()).with_source(MessageSource::Script);
    fx.storage
        .write_log_at(LogTime::new(1002, 0), cellapp().addr, &cellapp().registration, &message)
        .unwrap();
    let reader = fx.reader();

    assert_eq!(
        messages(&reader, &QueryParams::new().with_categories(["physics"])),
        ["Step took 12 ms"]
    );
    assert!(messages(&reader, &QueryParams::new().with_categories(["nothing"])).is_empty());
    assert_eq!(
        messages(&reader, &QueryParams::new().with_sources(MessageSource::Script.mask())),
        ["from script"]
    );

    assert_eq!(messages(&reader, &QueryParams::new().with_include("^step")), ["step skipped"]);
    assert_eq!(
        messages(&reader, &QueryParams::new().with_include("^step").with_casesens(false)),
        ["Step took 12 ms", "step skipped"]
    );
    assert_eq!(
        messages(&reader, &QueryParams::new().with_exclude("(?i)step")),
        ["from script"]
    );

    // pre-interpolation matches the rendered text, post matches the format string
    assert_eq!(messages(&reader, &QueryParams::new().with_include("12 ms")), ["Step took 12 ms"]);
    let post = QueryParams::new().with_include("%d ms").with_interpolate(Interpolation::Post);
    assert_eq!(messages(&reader, &post), ["Step took 12 ms"]);
    let raw = QueryParams::new().with_include("%d ms").with_interpolate(Interpolation::Dont);
    assert_eq!(messages(&reader, &raw), ["Step took %d ms"]);

    let log = reader.user_log(UID).unwrap();
    assert!(matches!(
        reader.query(&log, &QueryParams::new().with_include("(")),
        Err(CoreError::InvalidRegex { .. })
    ));
}

#[test]
fn results_carry_component_and_metadata() {
    let mut fx = Fixture::new(4096);
    let cell = cellapp();
    fx.storage.register_component(cell.addr, &cell.registration);
    fx.storage.set_app_id(cell.addr, 1).unwrap();

    let fmt = FormatString::parse("%s failed with code %d").unwrap();
    let args = fmt.stream_args(&["flush".into(), 5.into()]).unwrap();
    let message = LogMessage::new(Priority::Error, fmt.as_str(), args)
        .with_metadata(Metadata::Fields(vec![("space".into(), Arg::UInt(7))]));
    fx.storage
        .write_log_at(LogTime::new(1000, 0), cell.addr, &cell.registration, &message)
        .unwrap();

    let reader = fx.reader();
    let log = reader.user_log(UID).unwrap();
    let params = QueryParams::new().with_priorities(&[Priority::Error]);
    let items: Vec<_> = reader.query(&log, &params).unwrap().map(Result::unwrap).collect();
    assert_eq!(items.len(), 1);
    let result = items[0].result().unwrap();
    assert_eq!(result.message, "flush failed with code 5");
    assert_eq!(result.component_label(), "CellApp01");
    assert_eq!(result.host, "host1");
    assert_eq!(result.pid, 100);
    assert_eq!(result.metadata.as_deref(), Some(r#"{"space":7}"#));
}

#[test]
fn truncated_arguments_skip_only_that_entry() {
    let mut fx = Fixture::new(4096);
    fx.write(1000, cellapp(), Priority::Info, "ok %d", &[Arg::from(1)]);
    let short = LogMessage::new(Priority::Info, "broken %d", vec![1, 2]);
    fx.storage
        .write_log_at(LogTime::new(1001, 0), cellapp().addr, &cellapp().registration, &short)
        .unwrap();
    fx.write(1002, cellapp(), Priority::Info, "ok %d", &[Arg::from(3)]);

    assert_eq!(messages(&fx.reader(), &QueryParams::new()), ["ok 1", "ok 3"]);
}

#[test]
fn oversized_star_width_skips_only_that_entry() {
    let mut fx = Fixture::new(4096);
    fx.write(1000, cellapp(), Priority::Info, "ok %d", &[Arg::from(1)]);
    let mut stream = 200_000_000i32.to_le_bytes().to_vec();
    stream.extend_from_slice(&7i32.to_le_bytes());
    let padded = LogMessage::new(Priority::Info, "pad %*d", stream);
    fx.storage
        .write_log_at(LogTime::new(1001, 0), cellapp().addr, &cellapp().registration, &padded)
        .unwrap();
    fx.write(1002, cellapp(), Priority::Info, "ok %d", &[Arg::from(3)]);

    assert_eq!(messages(&fx.reader(), &QueryParams::new()), ["ok 1", "ok 3"]);
}
