use std::time::Duration;

use anyhow::{bail, Context};
use coopmac::frame::{Frame, FrameKey, Payload};
use coopmac::mac::ChannelAccess;
use coopmac::phy::{
    CombiningReceiver, ConstantRate, LinkEnv, Phy, ReceivedFrame, TxMode, UpperLayer,
};
use coopmac::seq::SeqNum;
use coopmac::util::logger;
use coopmac_config::{CombiningConfig, NodeConfig, NodeID};

const S: NodeID = NodeID::new('S');
const R: NodeID = NodeID::new('R');
const D: NodeID = NodeID::new('D');

/// Transmissions take no time and never collide, every node hears a frame
/// right after the sender's timer fired.
struct MediumPhy {
    outbox: Vec<(Vec<u8>, TxMode)>,
    combiner: CombiningReceiver,
    now: Duration,
    rx_mode: TxMode,
}

impl Phy for MediumPhy {
    fn carrier_busy(&self) -> bool {
        false
    }

    fn transmit(&mut self, frame: &[u8], mode: &TxMode) -> bool {
        self.outbox.push((frame.to_vec(), mode.clone()));
        true
    }

    fn store_or_combine_copy(
        &mut self,
        frame: &Frame,
        snr_db: f64,
        link_error_rate: f64,
    ) -> bool {
        let mode = self.rx_mode.clone();
        self.combiner
            .store_or_combine_copy(frame, snr_db, link_error_rate, &mode, self.now)
    }

    fn attempt_reconstruction(&mut self, key: &FrameKey) -> bool {
        self.combiner.attempt_reconstruction(key)
    }
}

#[derive(Default)]
struct Inbox {
    delivered: Vec<(Payload, NodeID, NodeID)>,
    failed: Vec<(NodeID, SeqNum)>,
}

impl UpperLayer for Inbox {
    fn on_frame_delivered(&mut self, payload: Payload, src: NodeID, dst: NodeID) {
        self.delivered.push((payload, src, dst));
    }

    fn on_final_failure(&mut self, dst: NodeID, seq: SeqNum) {
        self.failed.push((dst, seq));
    }
}

struct SimNode {
    mac: ChannelAccess,
    phy: MediumPhy,
    rates: ConstantRate,
    upper: Inbox,
}

impl SimNode {
    fn new(id: NodeID, relay: bool, seed: u64) -> Self {
        let mut config = NodeConfig::new(id);
        config.relay = relay;
        config.rng_seed = seed;
        Self {
            mac: ChannelAccess::new(config),
            phy: MediumPhy {
                outbox: Vec::new(),
                combiner: CombiningReceiver::new(CombiningConfig::default(), seed),
                now: Duration::ZERO,
                rx_mode: TxMode::new("QPSK 3/4", 12_000_000, 4, 1.5),
            },
            rates: ConstantRate::default(),
            upper: Inbox::default(),
        }
    }

    fn with_env<T>(
        &mut self,
        now: Duration,
        f: impl FnOnce(&mut ChannelAccess, &mut LinkEnv) -> T,
    ) -> T {
        self.phy.now = now;
        let mut env = LinkEnv {
            now,
            phy: &mut self.phy,
            rates: &mut self.rates,
            upper: &mut self.upper,
        };
        f(&mut self.mac, &mut env)
    }
}

#[derive(Clone, Copy)]
enum Link {
    Clean,
    /// Header decodes, payload arrives with the given error rate.
    Damaged { snr_db: f64, ler: f64 },
    OutOfRange,
}

struct Medium {
    nodes: Vec<SimNode>,
    links: fn(NodeID, NodeID) -> Link,
    now: Duration,
}

impl Medium {
    fn node(&mut self, id: NodeID) -> anyhow::Result<&mut SimNode> {
        self.nodes
            .iter_mut()
            .find(|n| n.mac.id() == id)
            .with_context(|| format!("no node {}", id))
    }

    fn enqueue(&mut self, src: NodeID, dst: NodeID, payload: Payload) -> anyhow::Result<()> {
        let now = self.now;
        let accepted = self
            .node(src)?
            .with_env(now, |mac, env| mac.enqueue(payload, dst, env));
        if !accepted {
            bail!("{} refused a frame for {}", src, dst);
        }
        Ok(())
    }

    fn run_until(&mut self, until: Duration) {
        loop {
            let next = self
                .nodes
                .iter_mut()
                .filter_map(|n| n.mac.next_deadline())
                .min();
            let Some(now) = next.filter(|&t| t <= until) else {
                break;
            };
            self.now = now;

            for i in 0..self.nodes.len() {
                let due = self.nodes[i].mac.next_deadline().map_or(false, |t| t <= now);
                if due {
                    self.nodes[i].with_env(now, |mac, env| mac.on_timers_due(env));
                    self.flush(i);
                }
            }
        }
        self.now = until;
    }

    fn flush(&mut self, sender: usize) {
        let now = self.now;
        let sent: Vec<_> = self.nodes[sender].phy.outbox.drain(..).collect();
        for (bytes, mode) in sent {
            self.nodes[sender].with_env(now, |mac, env| mac.on_send_complete(env));

            let from = self.nodes[sender].mac.id();
            for j in 0..self.nodes.len() {
                if j == sender {
                    continue;
                }
                let to = self.nodes[j].mac.id();
                let (payload_ok, snr_db, link_error_rate) = match (self.links)(from, to) {
                    Link::Clean => (true, 20.0, 0.0),
                    Link::Damaged { snr_db, ler } => (false, snr_db, ler),
                    Link::OutOfRange => continue,
                };
                let rx = ReceivedFrame {
                    bytes: bytes.clone(),
                    snr_db,
                    link_error_rate,
                    mode: mode.clone(),
                    header_ok: true,
                    payload_ok,
                    reconstructed: false,
                };
                let node = &mut self.nodes[j];
                node.phy.rx_mode = mode.clone();
                node.with_env(now, |mac, env| mac.on_receive_complete(rx, env));
            }
        }
    }
}

fn medium(links: fn(NodeID, NodeID) -> Link) -> Medium {
    logger::try_init(log::LevelFilter::Warn);
    Medium {
        nodes: vec![
            SimNode::new(S, false, 1),
            SimNode::new(R, true, 2),
            SimNode::new(D, false, 3),
        ],
        links,
        now: Duration::ZERO,
    }
}

#[test]
fn test_relay_carries_data_and_acks() -> anyhow::Result<()> {
    // S and D cannot hear each other at all
    let mut medium = medium(|a, b| match (a, b) {
        (S, D) | (D, S) => Link::OutOfRange,
        _ => Link::Clean,
    });

    for i in 0..5u8 {
        medium.enqueue(S, D, Payload::new(vec![i; 8]))?;
    }
    medium.run_until(Duration::from_millis(100));

    let d = medium.node(D)?;
    let payloads: Vec<u8> = d.upper.delivered.iter().map(|(p, _, _)| p[0]).collect();
    assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
    assert!(d.upper.delivered.iter().all(|(_, src, dst)| *src == S && *dst == D));

    let r = medium.node(R)?;
    assert_eq!(r.mac.stats().relayed(), 5);
    assert_eq!(r.mac.stats().acks_forwarded(), 5);

    let s = medium.node(S)?;
    assert!(s.upper.failed.is_empty());
    let record = s.mac.arq().send_record(D).context("S never sent to D")?;
    for seq in 0..5 {
        assert!(record.outstanding(seq).is_none(), "{} still outstanding", seq);
        assert!(record.is_acked(seq));
    }
    assert_eq!(record.in_flight(), 0);
    Ok(())
}

#[test]
fn test_damaged_copies_are_combined() -> anyhow::Result<()> {
    // D only gets corrupted copies, from S directly and through R
    let mut medium = medium(|a, b| match (a, b) {
        (S, D) | (R, D) => Link::Damaged {
            snr_db: 20.0,
            ler: 0.05,
        },
        (D, S) => Link::OutOfRange,
        _ => Link::Clean,
    });

    medium.enqueue(S, D, Payload::new(vec![7; 8]))?;
    medium.run_until(Duration::from_millis(10));

    let d = medium.node(D)?;
    assert_eq!(d.upper.delivered.len(), 1);
    assert_eq!(d.upper.delivered[0].0, Payload::new(vec![7; 8]));
    assert_eq!(d.mac.stats().reconstructions(), 1);
    assert!(d.phy.combiner.pool().is_empty());

    let s = medium.node(S)?;
    let record = s.mac.arq().send_record(D).context("S never sent to D")?;
    assert!(record.is_acked(0));
    assert_eq!(s.mac.stats().retransmissions(), 0);
    Ok(())
}

#[test]
fn test_lossy_relay_copy_is_combined() -> anyhow::Result<()> {
    // nobody gets a clean copy of the data, R passes on what it overheard
    let mut medium = medium(|a, b| match (a, b) {
        (S, R) | (R, D) => Link::Damaged {
            snr_db: 8.0,
            ler: 0.4,
        },
        (S, D) => Link::Damaged {
            snr_db: 6.0,
            ler: 0.3,
        },
        (D, S) => Link::OutOfRange,
        _ => Link::Clean,
    });

    medium.enqueue(S, D, Payload::new(vec![3; 125]))?;
    medium.run_until(Duration::from_millis(10));

    let r = medium.node(R)?;
    assert_eq!(r.mac.stats().relayed(), 1);
    assert_eq!(r.mac.stats().acks_forwarded(), 1);

    let d = medium.node(D)?;
    assert_eq!(d.upper.delivered.len(), 1);
    assert_eq!(d.upper.delivered[0].0, Payload::new(vec![3; 125]));
    assert_eq!(d.mac.stats().reconstructions(), 1);

    let s = medium.node(S)?;
    let record = s.mac.arq().send_record(D).context("S never sent to D")?;
    assert!(record.is_acked(0));
    assert!(s.upper.failed.is_empty());
    Ok(())
}
