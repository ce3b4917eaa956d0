use dporsched::thread::construct_thread_id;
use dporsched::{
    verify, Config, DporError, EndCondition, ExplorationMode, OperationType, Schedulable,
    SchedulingStrategy,
};
use utils::{explore, Op::*};

mod utils;

#[test]
fn tosses_are_explored_depth_first() {
    utils::init_log();
    let (stats, runs) = explore(Config::builder().build(), &[vec![Toss, Toss, Stop]]).unwrap();
    assert_eq!(stats.iterations, 4);
    let tosses: Vec<Vec<bool>> = runs.iter().map(|r| r.tosses.clone()).collect();
    assert_eq!(
        tosses,
        vec![
            vec![false, false],
            vec![false, true],
            vec![true, false],
            vec![true, true]
        ]
    );
}

#[test]
fn tosses_of_independent_actors() {
    let scripts = [vec![Toss, Stop], vec![Toss, Stop]];
    let (stats, _) = explore(Config::builder().build(), &scripts).unwrap();
    assert_eq!(stats.iterations, 4);
}

#[test]
fn tosses_and_races_multiply() {
    let scripts = [vec![Toss, Send(5), Stop], vec![Send(5), Stop]];
    let (stats, runs) = explore(Config::builder().build(), &scripts).unwrap();
    assert_eq!(stats.execs, 4);
    let mut seen: Vec<(Vec<bool>, Vec<u32>)> =
        runs.iter().map(|r| (r.tosses.clone(), r.senders())).collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 4);
}

fn single_yield() -> [Schedulable; 1] {
    [Schedulable::new(construct_thread_id(0), true, OperationType::Yield)]
}

#[test]
fn integer_choices_are_rejected_depth_first() {
    let result = verify(Config::builder().build(), |s| {
        s.next(&single_yield(), construct_thread_id(0))?;
        s.next_integer_choice(3)?;
        Ok(EndCondition::AllFinished)
    });
    assert!(matches!(result, Err(DporError::UnsupportedIntegerChoice)));
}

#[test]
fn integer_choices_in_random_mode() {
    let conf = Config::builder()
        .with_mode(ExplorationMode::Random)
        .with_seed(9)
        .with_max_iterations(20)
        .build();
    let mut values = Vec::new();
    verify(conf, |s| {
        s.next(&single_yield(), construct_thread_id(0))?;
        values.push(s.next_integer_choice(4)?);
        Ok(EndCondition::AllFinished)
    })
    .unwrap();
    assert_eq!(values.len(), 20);
    assert!(values.iter().all(|&v| v < 4));
}
