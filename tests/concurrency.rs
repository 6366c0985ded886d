/// Contention scenarios: parallel consumers, reseed interlock behavior
/// under load.
mod common;

use common::TestDaemon;
use std::thread;

#[test]
fn test_two_clients_pull_a_mebibyte_each() {
    let daemon = TestDaemon::start();
    daemon.seed_once();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let mut client = daemon.client();
        handles.push(thread::spawn(move || {
            client.get_random_bytes(1024 * 1024).unwrap()
        }));
    }

    let outputs: Vec<Vec<u8>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for out in &outputs {
        assert_eq!(out.len(), 1024 * 1024);
        assert!(out.iter().any(|&b| b != 0), "output must be non-zero");
    }
    // Two independent streams must not be identical
    assert_ne!(outputs[0], outputs[1]);
}

#[test]
fn test_forced_reseed_under_parallel_load() {
    let daemon = TestDaemon::start();
    daemon.seed_once();

    // Every generator sees must_reseed at once; the pool trylock admits
    // the reseeds one at a time and nobody deadlocks or fails
    daemon.ctx.manager.force_reseed();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let mut client = daemon.client();
        handles.push(thread::spawn(move || {
            client.get_random_bytes(64 * 1024).unwrap()
        }));
    }
    for handle in handles {
        let out = handle.join().unwrap();
        assert_eq!(out.len(), 64 * 1024);
    }

    // The storm is over: a deadline walk reseeds whatever stayed
    // latched and every instance ends up clean
    esdm::drng::seeder::reseed_overdue(&daemon.ctx);
    let instances = daemon.ctx.manager.get_instances();
    for inst in instances.iter().flatten() {
        assert!(!inst.reseed_forced(), "{} still latched", inst.name());
    }
}

#[test]
fn test_parallel_mixed_traffic() {
    let daemon = TestDaemon::start();
    daemon.seed_once();

    let mut handles = Vec::new();
    for i in 0..6 {
        let mut client = daemon.client();
        handles.push(thread::spawn(move || match i % 3 {
            0 => {
                client.get_random_bytes(32 * 1024).map(|v| v.len()).unwrap();
            }
            1 => {
                client.write_data(&[i as u8; 1024]).unwrap();
            }
            _ => {
                client.status().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}
