use batch_warden::config::WorkerConfig;
use batch_warden::output::{filter::sanitize_control_chars, LineFilter, OutputLine, OutputSink, StreamKind};

#[test]
fn default_filter_hides_stdout_and_known_stderr_noise() {
    let filter = LineFilter::new(&WorkerConfig::default()).unwrap();
    assert_eq!(filter.accept(StreamKind::Stdout, "chatter"), None);
    assert_eq!(filter.accept(StreamKind::Stderr, "log4cplus: no appenders"), None);
    assert_eq!(
        filter.accept(StreamKind::Stderr, "real failure"),
        Some("real failure".to_string())
    );
    assert_eq!(
        filter.accept(StreamKind::Channel, "processing unit 1"),
        Some("processing unit 1".to_string())
    );
}

#[test]
fn switches_turn_streams_on_and_off() {
    let cfg = WorkerConfig {
        show_stdout: true,
        show_error_messages: false,
        ..WorkerConfig::default()
    };
    let filter = LineFilter::new(&cfg).unwrap();
    assert_eq!(filter.accept(StreamKind::Stdout, "hi"), Some("hi".to_string()));
    assert_eq!(filter.accept(StreamKind::Stderr, "real failure"), None);
}

#[test]
fn bad_ignore_pattern_is_a_config_error() {
    let cfg = WorkerConfig {
        ignore_stderr_patterns: vec!["(".into()],
        ..WorkerConfig::default()
    };
    assert!(LineFilter::new(&cfg).is_err());
}

#[test]
fn control_characters_are_stripped_but_tabs_stay() {
    assert_eq!(sanitize_control_chars("a\tb\u{1b}[31mc\u{7}"), "a\tb[31mc");
    let filter = LineFilter::passthrough();
    assert_eq!(
        filter.accept(StreamKind::Stdout, "\u{0}x"),
        Some("x".to_string())
    );
}

#[test]
fn vec_sink_collects_lines() {
    let mut sink: Vec<OutputLine> = Vec::new();
    sink.emit(&OutputLine {
        stream: StreamKind::Channel,
        pid: 9,
        text: "hello".into(),
    });
    assert_eq!(sink.len(), 1);
    assert_eq!(sink[0].pid, 9);
}
