use orcano::host::memory::MemoryHost;
use orcano::host::{Host, Uid};
use orcano::interpreter::Engine;
use orcano::interpreter::stack::STACK_CAPACITY;
use orcano::quant::{QuantConfig, QuantType, pack_paired};
use orcano::{Config, StackValue, process_request};

fn run(host: &mut MemoryHost, request: &str) -> String {
    process_request(host, request, &Config::default())
        .expect("no fatal error")
        .to_string()
}

fn run_fresh(request: &str) -> String {
    run(&mut MemoryHost::with_seed(11), request)
}

// --- Literals and arithmetic ---

#[test]
fn int_literals_push_exactly() {
    let mut rng = fastrand::Rng::with_seed(5);
    for _ in 0..200 {
        let n = rng.i32(..);
        assert_eq!(run_fresh(&format!("int:i{n}")), format!("out: i{n}"));
    }
}

#[test]
fn hex_and_octal_literals() {
    assert_eq!(run_fresh("int:i0x10 int:i010 int:i-0x1"), "out: i-1 i8 i16");
}

#[test]
fn documented_examples() {
    assert_eq!(run_fresh("int:i2 int:i3 addi"), "out: i5");
    assert!(run_fresh("float:f1.5 float:f2.5 addf").contains("out: f4"));
    assert_eq!(run_fresh("bogus"), "error: invalid command");
    assert_eq!(run_fresh("drop:i1"), "out:");
}

#[test]
fn float_formatting() {
    assert_eq!(run_fresh("float:f0.1"), "out: f0.100000001");
    assert_eq!(run_fresh("float:f1e10"), "out: f1e+10");
    assert_eq!(run_fresh("float:f-inf"), "out: f-inf");
    assert_eq!(run_fresh("float:f0x1.8p1"), "out: f3");
}

// --- Errors ---

#[test]
fn bad_paired_len() {
    // scale byte plus three bytes of entries
    let text = "AQIDBA==";
    assert_eq!(run_fresh(&format!("float:p{text}")), "error: invalid argument: bad paired len");
}

#[test]
fn argument_syntax_errors() {
    assert_eq!(run_fresh("int:"), "error: invalid argument: expected type code");
    assert_eq!(run_fresh("int:q1"), "error: invalid argument: unexpected type code");
    assert_eq!(run_fresh("int:i1x"), "error: invalid argument: unexpected post-immediate text");
    assert_eq!(run_fresh("int:p***"), "error: invalid argument: bad paired text");
}

#[test]
fn overflow_halts_rest_of_request() {
    let mut host = MemoryHost::with_seed(11);
    let request = format!("rpt:i{}:i1 print:after", STACK_CAPACITY + 1);
    assert_eq!(run(&mut host, &request), "error: stack overflow");
    assert!(host.take_output().is_empty());
}

#[test]
fn filling_the_stack_exactly_is_fine() {
    let out = run_fresh(&format!("rpt:i{STACK_CAPACITY}:i7"));
    assert_eq!(out.matches(" i7").count(), STACK_CAPACITY);
}

// --- Stack discipline ---

#[test]
fn stack_round_trip_keeps_top() {
    for top in ["int:i-3", "float:f2.75", "int:i0"] {
        let before = run_fresh(&format!("int:i9 {top}"));
        let after = run_fresh(&format!("int:i9 {top} stack:s"));
        assert_eq!(before, after);
    }
}

#[test]
fn results_never_feed_the_same_command() {
    let mut host = MemoryHost::with_seed(11);
    let mut engine = Engine::new(&mut host);
    engine.run("int:i1 int:i2 dup:s");
    let values: Vec<_> = engine.stack().iter_top_down().copied().collect();
    assert_eq!(values, vec![StackValue::Int(2), StackValue::Int(2), StackValue::Int(1)]);

    // rpt draws count and value from below, then pushes above
    let mut engine = Engine::new(&mut host);
    engine.run("int:i1 int:i2 rpt");
    assert!(engine.error().is_none());
    let values: Vec<_> = engine.stack().iter_top_down().copied().collect();
    assert_eq!(values, vec![StackValue::Int(1), StackValue::Int(1)]);
}

#[test]
fn quant_round_trip_within_one_step() {
    let mut rng = fastrand::Rng::with_seed(2);
    for scale in [0, 2, 5, 8] {
        let cfg = QuantConfig::new(scale, QuantType::Int16);
        let step = 1.0 / (1 << scale) as f32;
        for _ in 0..100 {
            let v = (rng.f32() - 0.5) * 100.0;
            let back = cfg.decode(&cfg.encode(v)).expect("decodes");
            assert!((back - v).abs() <= step, "scale {scale}: {v} -> {back}");
        }
    }
}

#[test]
fn paired_values_feed_successive_arguments() {
    let paired = pack_paired(4, &[0.5, 1.5, 2.0]);
    // n = 2, x = 0.5, coefficients 1.5 and 2.0
    assert_eq!(run_fresh(&format!("poly:i2:p{paired}")), "out: f2.5");
}

// --- Host-backed commands ---

#[test]
fn unsigned_int_keeps_negative_keys() {
    let mut host = MemoryHost::with_seed(11);
    assert_eq!(run(&mut host, "user:i-1:i-2:i-3:i-4"), "out: i1");
    assert_eq!(host.number(Uid(-1, -2), -1), Some(StackValue::Int(-3)));
    assert_eq!(host.number(Uid(-1, -2), -2), Some(StackValue::Int(-4)));
}

#[test]
fn committed_writes_survive_a_later_error() {
    let mut host = MemoryHost::with_seed(11);
    assert_eq!(
        run(&mut host, "user:i1:i1:i2:i2 setn:i3:f0.5 int:x"),
        "error: invalid argument: unexpected type code"
    );
    assert_eq!(host.number(Uid(1, 1), 3), Some(StackValue::Float(0.5)));
}

#[test]
fn otp_auth_sends_one_invalidation_per_command() {
    let mut host = MemoryHost::with_seed(11);
    run(&mut host, "otp_init:i8:i9");
    assert_eq!(run(&mut host, "otp_sync:i8:i9 otp_sync:i8:i9 otp_auth:i8:i9:i1:i2"), "out: i0 i0 i0");
    assert_eq!(host.invalidations(), 3);
}

/// Answers every request with the wrong ident.
struct Contrary;

impl Host for Contrary {
    fn send(&mut self, _: &orcano::host::Message) -> Result<(), orcano::host::HostError> {
        Ok(())
    }

    fn recv(&mut self) -> Result<orcano::host::Message, orcano::host::HostError> {
        Ok(orcano::host::Message::empty(*b"XXXX"))
    }
}

#[test]
fn bad_host_answer_names_the_command() {
    let config = Config::default();
    for (request, name) in [("user", "user"), ("otp_init", "otp_init"), ("otp_sync", "otp_sync")] {
        let response = process_request(&mut Contrary, request, &config).expect("no fatal error");
        assert_eq!(response.to_string(), format!("error: bad answer for {name} cmd"));
    }
}

#[test]
fn unauthenticated_storage_never_reaches_host() {
    let config = Config::default();
    let response = process_request(&mut Contrary, "getn:i1 setn:i1:i2 lockn:i1", &config).expect("no fatal error");
    assert_eq!(response.to_string(), "out: i0");
}
