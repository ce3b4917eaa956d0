use std::collections::HashSet;

use dporsched::{Config, EndCondition};
use utils::{explore, Op, Op::*};

mod utils;

fn dfs() -> Config {
    Config::builder().with_seed(0).build()
}

fn sender(n: usize, inbox: u32) -> Vec<Op> {
    let mut script = vec![Send(inbox); n];
    script.push(Stop);
    script
}

#[test]
fn racing_sends_are_swapped_once() {
    utils::init_log();
    let (stats, runs) = explore(dfs(), &[sender(1, 5), sender(1, 5)]).unwrap();
    assert_eq!(stats.iterations, 2);
    assert_eq!(stats.execs, 2);
    assert_eq!(runs[0].senders(), vec![0, 1]);
    assert_eq!(runs[1].senders(), vec![1, 0]);
    assert!(stats.races >= 2);
}

#[test]
fn every_send_order_is_explored_once() {
    let (stats, runs) = explore(dfs(), &[sender(2, 5), sender(2, 5)]).unwrap();
    assert_eq!(stats.iterations, 6);
    assert_eq!(stats.sleep_blocked, 0);
    let orders: HashSet<Vec<u32>> = runs.iter().map(|r| r.senders()).collect();
    assert_eq!(orders.len(), 6);
}

#[test]
fn three_senders() {
    let (stats, runs) = explore(dfs(), &[sender(1, 5), sender(1, 5), sender(1, 5)]).unwrap();
    assert_eq!(stats.execs, 6);
    let orders: HashSet<Vec<u32>> = runs.iter().map(|r| r.senders()).collect();
    assert_eq!(orders.len(), 6);
}

#[test]
fn sends_to_different_inboxes_do_not_race() {
    let (stats, runs) = explore(dfs(), &[sender(1, 5), sender(1, 6)]).unwrap();
    assert_eq!(stats.iterations, 1);
    assert_eq!(stats.races, 0);
    assert_eq!(runs[0].end, Some(EndCondition::AllFinished));
}

#[test]
fn receiver_sees_both_orders() {
    let receiver = vec![Receive(5), Receive(5), Stop];
    let (stats, runs) = explore(dfs(), &[sender(1, 5), sender(1, 5), receiver]).unwrap();
    assert_eq!(stats.iterations, 2);
    let orders: Vec<Vec<u32>> = runs
        .iter()
        .map(|r| r.received.iter().map(|&(_, from)| u32::from(from)).collect())
        .collect();
    assert_eq!(orders, vec![vec![0, 1], vec![1, 0]]);
}

#[test]
fn created_actor_races_with_its_parent() {
    let main = vec![Create(vec![Send(5), Stop]), Send(5), Stop];
    let (stats, runs) = explore(dfs(), &[main]).unwrap();
    assert_eq!(stats.iterations, 2);
    assert_eq!(runs[0].senders(), vec![0, 1]);
    assert_eq!(runs[1].senders(), vec![1, 0]);
}

#[test]
fn join_waits_for_the_child() {
    let main = vec![Create(vec![Send(5), Stop]), Send(5), Join(1), Stop];
    let (stats, runs) = explore(dfs(), &[main]).unwrap();
    assert_eq!(stats.execs, 2);
    for run in &runs {
        let join = run.trace.iter().position(|(_, op)| *op == Join(1)).unwrap();
        let child_stop = run
            .trace
            .iter()
            .position(|(t, op)| u32::from(*t) == 1 && *op == Stop)
            .unwrap();
        assert!(child_stop < join);
    }
}

#[test]
fn receive_without_sender_deadlocks() {
    let (stats, runs) = explore(dfs(), &[vec![Receive(1), Stop]]).unwrap();
    assert_eq!(stats.iterations, 1);
    assert_eq!(stats.block, 1);
    assert_eq!(runs[0].end, Some(EndCondition::Deadlock));
}

#[test]
fn without_reduction_every_interleaving_runs() {
    let conf = Config::builder()
        .with_dpor(false)
        .with_sleep_sets(false)
        .build();
    let (stats, _) = explore(conf, &[sender(1, 5), sender(1, 5)]).unwrap();
    // two actors of two operations each
    assert_eq!(stats.execs, 6);
}

#[test]
fn sleep_sets_without_dpor() {
    let conf = Config::builder().with_dpor(false).build();
    let (stats, runs) = explore(conf, &[sender(1, 5), sender(1, 5)]).unwrap();
    assert_eq!(stats.execs, 2);
    assert_eq!(stats.sleep_blocked, 2);
    let orders: HashSet<Vec<u32>> = runs
        .iter()
        .filter(|r| r.end == Some(EndCondition::AllFinished))
        .map(|r| r.senders())
        .collect();
    assert_eq!(orders.len(), 2);
}

#[test]
fn step_limit_ends_the_execution() {
    let conf = Config::builder().with_step_limit(3).build();
    let (stats, runs) = explore(conf, &[vec![Yield, Yield, Yield, Yield, Stop]]).unwrap();
    assert_eq!(stats.iterations, 1);
    assert_eq!(runs[0].end, Some(EndCondition::StepLimit));
    assert_eq!(runs[0].trace.len(), 3);
    assert_eq!(stats.step_limit, 1);
    assert_eq!(stats.execs, 0);
}

#[test]
fn inboxes_with_large_ids() {
    let inbox = 3_000_000_000;
    let scripts = [vec![Send(inbox), Stop], vec![Send(inbox), Stop]];
    let (stats, runs) = explore(Config::builder().build(), &scripts).unwrap();
    assert_eq!(stats.execs, 2);
    assert_ne!(runs[0].senders(), runs[1].senders());
}
