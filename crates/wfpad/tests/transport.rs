use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use test_log::test;

use wfpad::constants::{MPU, MTU, OP_WT_PAGE_ID};
use wfpad::defenses::{BufloConfig, Defense, DynaflowConfig, WalkieTalkieConfig};
use wfpad::{Circuit, Dist, Message, MessageExtractor, Role, TransportState, WfPadTransport};

#[derive(Default)]
struct MockCircuit {
    upstream: Vec<u8>,
    downstream: Vec<u8>,
}

impl Circuit for MockCircuit {
    fn write_upstream(&mut self, data: &[u8]) {
        self.upstream.extend_from_slice(data);
    }
    fn write_downstream(&mut self, data: &[u8]) {
        self.downstream.extend_from_slice(data);
    }
}

type Transport = WfPadTransport<MockCircuit, StdRng, Instant>;

fn transport(role: Role, defense: Defense, t0: Instant) -> Transport {
    WfPadTransport::new(
        role,
        defense,
        MockCircuit::default(),
        StdRng::seed_from_u64(1),
        t0,
    )
}

/// Parse and clear everything the transport has put on the wire so far.
fn take_wire(t: &mut Transport) -> Vec<Message> {
    let bytes = std::mem::take(&mut t.circuit_mut().downstream);
    let mut ex = MessageExtractor::new();
    ex.extract(&bytes).unwrap()
}

/// Fire deadlines in order until the transport goes idle.
fn run_until_idle(t: &mut Transport) {
    for _ in 0..10_000 {
        match t.next_deadline() {
            Some(deadline) => t.on_timer(deadline),
            None => return,
        }
    }
    panic!("transport did not go idle");
}

#[test]
fn buflo_sends_fixed_size_messages_at_fixed_period() {
    let t0 = Instant::now();
    let mut c = transport(Role::Client, Defense::buflo(BufloConfig::default()), t0);

    c.on_session_starts(t0);
    c.recv_upstream(&[7u8; 1600], t0);

    for tick in 1..=3 {
        c.on_timer(t0 + Duration::from_millis(12 * tick));
    }

    let msgs = take_wire(&mut c);
    assert_eq!(msgs.len(), 3);

    // 1600 bytes split into one full payload and one padded remainder
    assert!(msgs[0].is_data());
    assert_eq!(msgs[0].payload.len(), MPU);
    assert!(msgs[1].is_data());
    assert_eq!(msgs[1].payload.len(), 1600 - MPU);
    assert!(msgs[2].is_padding());

    // every message leaves at MTU, data or not
    for m in &msgs {
        assert_eq!(m.total_len(), MTU);
    }

    // sends happen exactly at the configured period
    let at: Vec<Instant> = c.session().history().iter().map(|h| h.at).collect();
    assert_eq!(
        at,
        vec![
            t0 + Duration::from_millis(12),
            t0 + Duration::from_millis(24),
            t0 + Duration::from_millis(36),
        ]
    );
}

#[test]
fn buflo_pads_tail_until_mintime() {
    let t0 = Instant::now();
    let config = BufloConfig {
        mintime_ms: 100.0,
        ..Default::default()
    };
    let mut c = transport(Role::Client, Defense::buflo(config), t0);

    c.on_session_starts(t0);
    c.on_timer(t0 + Duration::from_millis(12));
    c.on_session_ends(t0 + Duration::from_millis(30));
    assert_eq!(c.state(), TransportState::Ending);

    run_until_idle(&mut c);
    assert_eq!(c.state(), TransportState::Idle);

    let msgs = take_wire(&mut c);
    assert!(msgs.iter().all(|m| m.is_padding()));
    // padding kept flowing past the session-end signal up to the mintime
    let last = c.session().history().last().unwrap().at;
    assert!(last >= t0 + Duration::from_millis(100));
}

#[test]
fn session_restart_resets_counters_and_discards_stale_deadlines() {
    let t0 = Instant::now();
    let mut c = transport(Role::Client, Defense::buflo(BufloConfig::default()), t0);

    c.on_session_starts(t0);
    let stale = c.next_deadline().unwrap();
    assert_eq!(stale, t0 + Duration::from_millis(12));

    c.on_session_starts(t0 + Duration::from_millis(5));
    assert_eq!(c.session().num_messages.sent, 0);

    // the deadline of the first session must not fire into the second
    c.on_timer(stale);
    assert!(take_wire(&mut c).is_empty());

    c.on_timer(t0 + Duration::from_millis(17));
    assert_eq!(take_wire(&mut c).len(), 1);
    assert_eq!(c.session().num_messages.sent, 1);
}

#[test]
fn dynaflow_stamps_queue_time_and_stops_on_ladder_rung() {
    let t0 = Instant::now();
    let mut c = transport(Role::Client, Defense::dynaflow(DynaflowConfig::default()), t0);

    // client period is gap * subseq = 12 * 4 = 48 ms
    c.on_session_starts(t0);
    assert_eq!(c.next_deadline(), Some(t0 + Duration::from_millis(48)));

    c.recv_upstream(b"hello", t0);
    c.on_timer(t0 + Duration::from_millis(48));

    let msgs = take_wire(&mut c);
    assert!(msgs[0].is_data());
    // the payload waited one full period before leaving
    assert_eq!(msgs[0].queue_time, 48);

    // one message so far: the first ladder rung above it is 4
    c.on_session_ends(t0 + Duration::from_millis(50));
    run_until_idle(&mut c);

    assert_eq!(c.state(), TransportState::Idle);
    let tail = take_wire(&mut c);
    assert_eq!(tail.len(), 3);
    assert!(tail.iter().all(|m| m.is_padding()));
}

#[test]
fn burst_padding_follows_received_data() {
    let t0 = Instant::now();
    let mut c = transport(Role::Client, Defense::buflo(BufloConfig::default()), t0);

    c.on_session_starts(t0);
    c.set_burst_delay(Some(Dist::fixed(5.0)));

    let data = Message::data(b"response".to_vec(), 0, 0);
    c.recv_downstream(&data.serialize(), t0);

    // the burst deadline lands ahead of the 12 ms flush
    assert_eq!(c.next_deadline(), Some(t0 + Duration::from_millis(5)));
    c.on_timer(t0 + Duration::from_millis(5));

    let msgs = take_wire(&mut c);
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].is_padding());

    // padding messages do not re-arm the burst, only data does
    assert_eq!(c.next_deadline(), Some(t0 + Duration::from_millis(12)));
}

fn write_burst_file(dir: &Path, id: &str, seq: &[(u64, u64)]) {
    fs::create_dir_all(dir).unwrap();
    let json = serde_json::to_vec(seq).unwrap();
    fs::write(dir.join(format!("{id}.json")), json).unwrap();
}

fn burst_dirs(name: &str) -> (PathBuf, PathBuf) {
    let base = std::env::temp_dir().join(format!("wfpad-{}-{name}", std::process::id()));
    (base.join("real"), base.join("decoy"))
}

#[test]
fn walkie_talkie_relays_page_id_and_molds_bursts() {
    let (burst_dir, decoy_dir) = burst_dirs("client");
    write_burst_file(&burst_dir, "example.com", &[(2, 0), (1, 0)]);
    write_burst_file(&decoy_dir, "example.com", &[(4, 0), (3, 0)]);

    let t0 = Instant::now();
    let config = WalkieTalkieConfig {
        burst_dir,
        decoy_dir,
        ..Default::default()
    };
    let mut c = transport(Role::Client, Defense::walkie_talkie(config), t0);

    c.on_session_starts(t0);
    c.on_page_id("http://example.com", t0);

    let msgs = take_wire(&mut c);
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].is_control());
    assert_eq!(msgs[0].opcode, Some(OP_WT_PAGE_ID));
    // the scheme is stripped before the id is relayed
    assert_eq!(msgs[0].args, b"example.com".to_vec());

    // first client burst: real data, then padding up to the decoy size
    c.recv_upstream(b"GET /", t0);
    c.on_timer(t0);
    let msgs = take_wire(&mut c);
    assert!(msgs[0].is_data());
    assert_eq!(msgs[1..].iter().filter(|m| m.is_padding()).count(), 2);
    assert!(c.next_deadline().is_none());

    // a server response flips the client to listening; more upstream data
    // flips it back and opens the second burst with its own budget
    let response = Message::data(b"200 OK".to_vec(), 0, 0);
    c.recv_downstream(&response.serialize(), t0 + Duration::from_millis(10));
    c.recv_upstream(b"GET /next", t0 + Duration::from_millis(20));
    c.on_timer(t0 + Duration::from_millis(20));

    let msgs = take_wire(&mut c);
    assert!(msgs[0].is_data());
    assert_eq!(msgs[1..].iter().filter(|m| m.is_padding()).count(), 2);
}

#[test]
fn walkie_talkie_server_pads_from_relayed_page_id() {
    let (burst_dir, decoy_dir) = burst_dirs("server");
    write_burst_file(&burst_dir, "example.com", &[(2, 3)]);
    write_burst_file(&decoy_dir, "example.com", &[(4, 9)]);

    let t0 = Instant::now();
    let config = WalkieTalkieConfig {
        burst_dir,
        decoy_dir,
        ..Default::default()
    };
    let mut s = transport(Role::Server, Defense::walkie_talkie(config), t0);

    s.on_session_starts(t0);
    let announce = Message::control(OP_WT_PAGE_ID, b"example.com".to_vec());
    s.recv_downstream(&announce.serialize(), t0);

    // the web server's burst: one data message, then the server-side budget
    s.recv_upstream(b"<html>hello</html>", t0 + Duration::from_millis(5));
    s.on_timer(t0 + Duration::from_millis(5));

    let msgs = take_wire(&mut s);
    assert!(msgs[0].is_data());
    assert_eq!(msgs[1..].iter().filter(|m| m.is_padding()).count(), 6);
}

#[test]
fn walkie_talkie_degrades_without_burst_files() {
    let t0 = Instant::now();
    let config = WalkieTalkieConfig::default();
    let mut c = transport(Role::Client, Defense::walkie_talkie(config), t0);

    c.on_session_starts(t0);
    c.on_page_id("nonexistent.example", t0);
    take_wire(&mut c);

    // data still flows, no mold padding is added
    c.recv_upstream(b"GET /", t0);
    c.on_timer(t0);
    let msgs = take_wire(&mut c);
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].is_data());
}

#[test]
fn control_piggyback_is_forwarded_and_unknown_opcode_dropped() {
    let t0 = Instant::now();
    let mut s = transport(Role::Server, Defense::buflo(BufloConfig::default()), t0);

    let mut unknown = Message::control(99, b"args".to_vec());
    unknown.payload = b"piggyback".to_vec();
    s.recv_downstream(&unknown.serialize(), t0);

    // the opcode is dropped but the payload fragment still flows upstream
    assert_eq!(s.circuit().upstream, b"piggyback");

    let data = Message::data(b" and data".to_vec(), 5, 0);
    s.recv_downstream(&data.serialize(), t0);
    assert_eq!(s.circuit().upstream, b"piggyback and data");

    // padding never reaches the application
    let padding = Message::padding(100);
    s.recv_downstream(&padding.serialize(), t0);
    assert_eq!(s.circuit().upstream, b"piggyback and data");
    assert_eq!(s.session().num_messages.rcv, 3);
}

#[test]
fn data_passes_through_without_a_session() {
    let t0 = Instant::now();
    let mut c = transport(Role::Client, Defense::buflo(BufloConfig::default()), t0);

    c.recv_upstream(b"hello", t0);

    let msgs = take_wire(&mut c);
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].is_data());
    assert_eq!(msgs[0].payload, b"hello");

    // no session, so no padding follows
    assert_eq!(c.state(), TransportState::Idle);
    assert!(c.next_deadline().is_none());
}
