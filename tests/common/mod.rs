// tests/common/mod.rs
//! In-memory multi-node network for driving `AodvNode`s under manual time.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use aodv_rs::{
    AodvConfig, AodvNode, ControlPacket, DataPacket, DropReason, ForwardingDecision, Interface,
    IpHeader, Outcome, RecvMeta, Route, RouteError, Transmission,
};

pub const BCAST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 255);

pub fn ip(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub type Node = AodvNode<Vec<Transmission>>;

pub struct Network {
    pub now: Instant,
    nodes: BTreeMap<Ipv4Addr, Node>,
    links: BTreeSet<(Ipv4Addr, Ipv4Addr)>,
    outcomes: Rc<RefCell<Vec<(Ipv4Addr, Outcome)>>>,
    /// Every transmission, in order, with the sending node.
    pub sent: Vec<(Ipv4Addr, Transmission)>,
    /// Data packets handed to a node's local stack.
    pub delivered: Vec<(Ipv4Addr, IpHeader)>,
    pub dropped: Vec<(Ipv4Addr, DropReason)>,
    /// Completions that reported an error, keyed by originating node.
    pub failures: Vec<(Ipv4Addr, RouteError)>,
}

fn edge(a: Ipv4Addr, b: Ipv4Addr) -> (Ipv4Addr, Ipv4Addr) {
    if a < b { (a, b) } else { (b, a) }
}

impl Network {
    /// One node per address suffix, each with a single interface.
    pub fn new(lasts: &[u8], config: AodvConfig) -> Self {
        init_tracing();
        let now = Instant::now();
        let nodes = lasts
            .iter()
            .map(|&last| {
                let cfg = config.clone().rng_seed(u64::from(last));
                let mut node = AodvNode::new(cfg, Vec::new(), now).expect("valid config");
                node.notify_interface_up(Interface::new(1, ip(last), BCAST), now);
                (ip(last), node)
            })
            .collect();
        Network {
            now,
            nodes,
            links: BTreeSet::new(),
            outcomes: Rc::default(),
            sent: Vec::new(),
            delivered: Vec::new(),
            dropped: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// A network with hello disabled, for deterministic traces.
    pub fn quiet(lasts: &[u8]) -> Self {
        Network::new(lasts, AodvConfig::new().enable_hello(false))
    }

    pub fn link(&mut self, a: u8, b: u8) {
        self.links.insert(edge(ip(a), ip(b)));
    }

    pub fn unlink(&mut self, a: u8, b: u8) {
        self.links.remove(&edge(ip(a), ip(b)));
    }

    pub fn linked(&self, a: Ipv4Addr, b: Ipv4Addr) -> bool {
        self.links.contains(&edge(a, b))
    }

    pub fn node(&self, last: u8) -> &Node {
        &self.nodes[&ip(last)]
    }

    pub fn node_mut(&mut self, last: u8) -> &mut Node {
        self.nodes.get_mut(&ip(last)).expect("known node")
    }

    /// Control packets sent by `last`, decoded.
    pub fn sent_by(&self, last: u8) -> Vec<(Transmission, ControlPacket)> {
        self.sent
            .iter()
            .filter(|(from, _)| *from == ip(last))
            .map(|(_, tx)| (tx.clone(), ControlPacket::from_bytes(&tx.payload).expect("well formed")))
            .collect()
    }

    /// Originate a data packet at `from` and run the network until idle.
    pub fn send(&mut self, from: u8, to: Ipv4Addr, id: u16) -> Result<Route, RouteError> {
        let src = ip(from);
        let packet = DataPacket::new(IpHeader::new(src, to, id, 64), b"payload".to_vec());
        let outcomes = Rc::clone(&self.outcomes);
        let completion = Box::new(move |o: Outcome| outcomes.borrow_mut().push((src, o)));
        let now = self.now;
        let res = self.node_mut(from).route_output(packet, completion, now);
        self.pump();
        res
    }

    /// Run every timer up to `now + d` in deadline order.
    pub fn advance(&mut self, d: Duration) {
        let target = self.now + d;
        loop {
            let next = self.nodes.values().filter_map(|n| n.poll_timeout()).min();
            match next {
                Some(t) if t <= target => {
                    self.now = self.now.max(t);
                    let now = self.now;
                    for node in self.nodes.values_mut() {
                        if node.poll_timeout().is_some_and(|d| d <= now) {
                            node.handle_timeout(now);
                        }
                    }
                    self.pump();
                }
                _ => break,
            }
        }
        self.now = target;
    }

    /// Deliver queued transmissions and data until nothing moves.
    fn pump(&mut self) {
        for _ in 0..10_000 {
            let mut moved = false;

            let addrs: Vec<Ipv4Addr> = self.nodes.keys().copied().collect();
            for from in addrs {
                let out: Vec<Transmission> = match self.nodes.get_mut(&from) {
                    Some(n) => n.transport_mut().drain(..).collect(),
                    None => continue,
                };
                for tx in out {
                    moved = true;
                    self.sent.push((from, tx.clone()));
                    self.deliver_control(from, tx);
                }
            }

            let pending: Vec<(Ipv4Addr, Outcome)> = self.outcomes.borrow_mut().drain(..).collect();
            for (at, outcome) in pending {
                moved = true;
                match outcome {
                    Outcome::Forward { route, packet } => self.forward_data(at, route, packet.header),
                    Outcome::Error { error, .. } => self.failures.push((at, error)),
                }
            }

            if !moved {
                return;
            }
        }
        panic!("network did not settle");
    }

    fn deliver_control(&mut self, from: Ipv4Addr, tx: Transmission) {
        let now = self.now;
        let meta = RecvMeta {
            sender: tx.source,
            interface: 1,
            ttl: tx.ttl,
            sender_hw: None,
        };
        if tx.destination == BCAST {
            let receivers: Vec<Ipv4Addr> = self
                .nodes
                .keys()
                .copied()
                .filter(|&to| to != from && self.linked(from, to))
                .collect();
            for to in receivers {
                if let Some(n) = self.nodes.get_mut(&to) {
                    n.recv_control(&tx.payload, meta, now);
                }
            }
        } else if self.linked(from, tx.destination) {
            if let Some(n) = self.nodes.get_mut(&tx.destination) {
                n.recv_control(&tx.payload, meta, now);
            }
        } else if let Some(n) = self.nodes.get_mut(&from) {
            n.notify_transmission_failure(tx.destination, now);
        }
    }

    /// Walk a data packet hop by hop from `at` along `route`.
    fn forward_data(&mut self, at: Ipv4Addr, route: Route, header: IpHeader) {
        let now = self.now;
        let mut work = VecDeque::from([(at, route, header)]);
        while let Some((from, route, header)) = work.pop_front() {
            let receivers: Vec<Ipv4Addr> = if route.gateway == BCAST {
                self.nodes
                    .keys()
                    .copied()
                    .filter(|&to| to != from && self.linked(from, to))
                    .collect()
            } else if self.linked(from, route.gateway) {
                vec![route.gateway]
            } else {
                if let Some(n) = self.nodes.get_mut(&from) {
                    n.notify_transmission_failure(route.gateway, now);
                }
                continue;
            };

            for to in receivers {
                let Some(node) = self.nodes.get_mut(&to) else {
                    continue;
                };
                match node.route_input(&header, 1, now) {
                    ForwardingDecision::Deliver => self.delivered.push((to, header)),
                    ForwardingDecision::DeliverAndForward(next) => {
                        self.delivered.push((to, header));
                        let mut onward = header;
                        onward.ttl -= 1;
                        work.push_back((to, next, onward));
                    }
                    ForwardingDecision::Forward(next) => {
                        let mut onward = header;
                        onward.ttl -= 1;
                        work.push_back((to, next, onward));
                    }
                    ForwardingDecision::Drop(reason) => self.dropped.push((to, reason)),
                }
            }
        }
    }
}
