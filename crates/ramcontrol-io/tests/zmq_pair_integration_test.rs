// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the ZMQ PAIR transport between task and host ends

use ramcontrol_io::{
    decode, encode, ChannelTransport, Message, MessageSocket, RamNetworkError, TransportSettings,
    ZmqPairSocket,
};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn pump_until<F>(transport: &mut ChannelTransport, deadline: Duration, mut done: F) -> Vec<Message>
where
    F: FnMut(&[Message]) -> bool,
{
    let start = Instant::now();
    let mut received = Vec::new();
    while start.elapsed() < deadline {
        transport.pump_outbound();
        received.extend(transport.pump_inbound());
        if done(&received) {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    received
}

/// Host connects, both sides exchange messages in order
#[test]
fn test_task_host_roundtrip() {
    let address = "tcp://127.0.0.1:31880";
    let barrier = Arc::new(Barrier::new(2));
    let barrier_host = Arc::clone(&barrier);

    let host_handle = thread::spawn(move || {
        barrier_host.wait();
        let mut host = ZmqPairSocket::connect(address, 0).unwrap();
        thread::sleep(Duration::from_millis(100)); // ZMQ connection setup time

        host.send_frame(&encode(&Message::connected()).unwrap()).unwrap();

        let mut trials = Vec::new();
        let start = Instant::now();
        while trials.len() < 5 && start.elapsed() < Duration::from_secs(5) {
            if let Some(frame) = host.recv_frame(Duration::from_millis(100)).unwrap() {
                let message = decode(&frame).unwrap();
                if let Some(data) = message.data() {
                    trials.push(data["trial"].as_i64().unwrap());
                }
            }
        }
        host.close();
        trials
    });

    let mut transport = ChannelTransport::new(TransportSettings::default());
    transport.bind(address).unwrap();
    barrier.wait();

    let received = pump_until(&mut transport, Duration::from_secs(5), |m| !m.is_empty());
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].kind(), "CONNECTED");

    for trial in 0..5 {
        transport.enqueue_outbound(Message::trial(trial)).unwrap();
    }
    let start = Instant::now();
    while transport.pending_outbound() > 0 && start.elapsed() < Duration::from_secs(2) {
        transport.pump_outbound();
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(transport.pending_outbound(), 0);

    let trials = host_handle.join().unwrap();
    assert_eq!(trials, vec![0, 1, 2, 3, 4]);
    transport.close();
}

/// A second bind on the same address fails
#[test]
fn test_bind_conflict() {
    let address = "tcp://127.0.0.1:31881";

    let mut first = ChannelTransport::new(TransportSettings::default());
    first.bind(address).unwrap();
    assert!(matches!(first.bind(address), Err(RamNetworkError::AlreadyBound(_))));

    let mut second = ChannelTransport::new(TransportSettings {
        linger_ms: 0,
        ..TransportSettings::default()
    });
    assert!(matches!(second.bind(address), Err(RamNetworkError::CannotBind(_))));

    first.close();
    first.close();
}

#[test]
fn test_bind_rejects_malformed_address() {
    let mut transport = ChannelTransport::new(TransportSettings::default());
    assert!(matches!(
        transport.bind("8889"),
        Err(RamNetworkError::InvalidSocketProperties(_))
    ));
    assert!(!transport.is_bound());
}
