use dporsched::thread::{construct_thread_id, main_thread_id};
use dporsched::{
    verify, Config, Decision, DporError, EndCondition, OperationType, Schedulable,
    SchedulingStrategy, Stats, StepIndex, TargetType, ThreadId,
};
use log::LevelFilter;
use simplelog::{CombinedLogger, SimpleLogger};
use std::collections::{HashMap, VecDeque};
use std::sync::Once;

static INIT_LOG: Once = Once::new();

#[allow(dead_code)] // Only used in tests
pub fn init_log() {
    INIT_LOG.call_once(|| {
        CombinedLogger::init(vec![SimpleLogger::new(
            LevelFilter::Trace,
            simplelog::Config::default(),
        )])
        .unwrap()
    });
}

/// One visible operation of a simulated actor.
#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Send(u32),
    /// Blocks until the inbox holds a message.
    Receive(u32),
    /// Spawns an actor running the script; it starts with an implicit `Start`.
    Create(Vec<Op>),
    /// Blocks until the actor is finished.
    Join(u32),
    Yield,
    /// A yield that draws a boolean from the scheduler.
    Toss,
    Start,
    Stop,
}

struct Actor {
    // "a{i}" for initial actors, "{parent}/c{k}" for the k-th child
    name: String,
    children: usize,
    script: Vec<Op>,
    pc: usize,
}

impl Actor {
    fn finished(&self) -> bool {
        self.pc >= self.script.len()
    }
}

/// A tiny message-passing runtime that runs one visible operation at a
/// time, as decided by the strategy. The initial actors are already running.
pub struct Program {
    actors: Vec<Actor>,
    inboxes: HashMap<u32, VecDeque<(StepIndex, ThreadId)>>,
    pub trace: Vec<(ThreadId, Op)>,
    /// (receiver, sender) in receive order
    pub received: Vec<(ThreadId, ThreadId)>,
    pub tosses: Vec<bool>,
    pub end: Option<EndCondition>,
}

#[allow(dead_code)]
impl Program {
    pub fn new(scripts: Vec<Vec<Op>>) -> Self {
        Self {
            actors: scripts
                .into_iter()
                .enumerate()
                .map(|(i, script)| Actor {
                    name: format!("a{}", i),
                    children: 0,
                    script,
                    pc: 0,
                })
                .collect(),
            inboxes: HashMap::new(),
            trace: Vec::new(),
            received: Vec::new(),
            tosses: Vec::new(),
            end: None,
        }
    }

    /// The threads that sent, in order.
    pub fn senders(&self) -> Vec<u32> {
        self.trace
            .iter()
            .filter(|(_, op)| matches!(op, Op::Send(_)))
            .map(|(t, _)| u32::from(*t))
            .collect()
    }

    /// The actors that sent, in order, named by how they were created
    /// rather than by thread id.
    pub fn sender_names(&self) -> Vec<String> {
        self.trace
            .iter()
            .filter(|(_, op)| matches!(op, Op::Send(_)))
            .map(|(t, _)| self.actors[usize::from(*t)].name.clone())
            .collect()
    }

    pub fn thread_of(&self, name: &str) -> Option<u32> {
        self.actors
            .iter()
            .position(|a| a.name == name)
            .map(|i| i as u32)
    }

    fn snapshot(&self) -> Vec<Schedulable> {
        self.actors
            .iter()
            .enumerate()
            .map(|(i, actor)| {
                let id = construct_thread_id(i as u32);
                let Some(op) = actor.script.get(actor.pc) else {
                    return Schedulable::new(id, false, OperationType::Stop)
                        .with_target(TargetType::Thread, i as u32);
                };
                match op {
                    Op::Send(inbox) => Schedulable::new(id, true, OperationType::Send)
                        .with_target(TargetType::Inbox, *inbox),
                    Op::Receive(inbox) => {
                        let front = self.inboxes.get(inbox).and_then(VecDeque::front);
                        let s = Schedulable::new(id, front.is_some(), OperationType::Receive)
                            .with_target(TargetType::Inbox, *inbox);
                        match front {
                            Some((step, _)) => s.with_send_step(*step),
                            None => s,
                        }
                    }
                    Op::Create(_) => Schedulable::new(id, true, OperationType::Create),
                    Op::Join(other) => {
                        let done = self
                            .actors
                            .get(*other as usize)
                            .map_or(false, Actor::finished);
                        Schedulable::new(id, done, OperationType::Join)
                            .with_target(TargetType::Thread, *other)
                    }
                    Op::Yield | Op::Toss => Schedulable::new(id, true, OperationType::Yield),
                    Op::Start => Schedulable::new(id, true, OperationType::Start)
                        .with_target(TargetType::Thread, i as u32),
                    Op::Stop => Schedulable::new(id, true, OperationType::Stop)
                        .with_target(TargetType::Thread, i as u32),
                }
            })
            .collect()
    }

    pub fn run<S: SchedulingStrategy>(&mut self, strategy: &mut S) -> Result<EndCondition, DporError> {
        let mut current = main_thread_id();
        loop {
            if self.actors.iter().all(Actor::finished) {
                return Ok(EndCondition::AllFinished);
            }
            if strategy.has_reached_max_scheduling_steps() {
                return Ok(EndCondition::StepLimit);
            }
            let next = match strategy.next(&self.snapshot(), current)? {
                Decision::Run(t) => t,
                Decision::Deadlock => return Ok(EndCondition::Deadlock),
                Decision::SleepSetBlocked => return Ok(EndCondition::SleepSetBlocked),
            };
            let step = StepIndex::new(strategy.scheduled_steps() as u32).expect("a step was taken");
            self.execute(next, step, strategy)?;
            current = next;
        }
    }

    fn execute<S: SchedulingStrategy>(
        &mut self,
        t: ThreadId,
        step: StepIndex,
        strategy: &mut S,
    ) -> Result<(), DporError> {
        let actor = &mut self.actors[usize::from(t)];
        let op = actor.script[actor.pc].clone();
        actor.pc += 1;
        match &op {
            Op::Send(inbox) => self.inboxes.entry(*inbox).or_default().push_back((step, t)),
            Op::Receive(inbox) => {
                let (_, from) = self
                    .inboxes
                    .get_mut(inbox)
                    .and_then(VecDeque::pop_front)
                    .expect("receive was scheduled without a message");
                self.received.push((t, from));
            }
            Op::Create(script) => {
                let mut script = script.clone();
                script.insert(0, Op::Start);
                let parent = &mut self.actors[usize::from(t)];
                let name = format!("{}/c{}", parent.name, parent.children);
                parent.children += 1;
                self.actors.push(Actor {
                    name,
                    children: 0,
                    script,
                    pc: 0,
                });
            }
            Op::Toss => {
                let b = strategy.next_boolean_choice()?;
                self.tosses.push(b);
            }
            Op::Join(_) | Op::Yield | Op::Start | Op::Stop => {}
        }
        self.trace.push((t, op));
        Ok(())
    }
}

/// Runs `scripts` under `verify`, keeping every execution.
#[allow(dead_code)]
pub fn explore(conf: Config, scripts: &[Vec<Op>]) -> Result<(Stats, Vec<Program>), DporError> {
    let mut runs = Vec::new();
    let stats = verify(conf, |strategy| {
        let mut program = Program::new(scripts.to_vec());
        let end = program.run(strategy)?;
        program.end = Some(end);
        runs.push(program);
        Ok(end)
    })?;
    Ok((stats, runs))
}
