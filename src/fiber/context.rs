//! The trampoline interpreter.
//!
//! A [`FiberContext`] runs one [`Instruction`] tree. Each call to
//! `evaluate_now` loops over a single "current instruction" slot: it checks
//! for pending interruption, checks the operation budget, then dispatches on
//! the instruction and produces the next one. The loop stops when the fiber
//! suspends, yields, is preempted, or is done.
//!
//! Continuations, environments, interrupt statuses, supervisors and fork
//! scope overrides live on explicit per-fiber stacks, so native stack depth
//! never grows with the depth of the description.
//!
//! # Locking
//!
//! - `run_state` is held for the whole of one `evaluate_now`. Resumptions
//!   always go through `Scheduler::dispatch_later`, so a fiber never
//!   re-enters its own loop.
//! - `state` is the only structure other fibers touch. Each transition is one
//!   short critical section, and observers run after it is released.

use std::convert::Infallible;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::fiber_ref::FiberLocals;
use super::state::{FiberState, Observer, ObserverKey, notify_observers};
use super::{Descriptor, FiberId, InterruptStatus, RuntimeFiber, Stack, Status};
use crate::cause::{Cause, Defect, Leaf};
use crate::effect::{
    Continuation, Erased, FailureHandler, Instruction, RaceContinuation, RawExit,
};
use crate::exit::Exit;
use crate::runtime::{Platform, Reporter, Supervisor, supervisor};
use crate::scope::{FinalizerKey, Scope};

/// A continuation stack entry.
enum Frame {
    Apply(Continuation),
    Fold {
        on_failure: FailureHandler,
        on_success: Continuation,
    },
    InterruptExit,
    EnvironmentExit,
    SupervisorExit,
    ForkScopeExit,
}

/// Everything only the running fiber touches.
struct RunState {
    stack: Stack<Frame>,
    environments: Stack<Erased>,
    interrupt_status: Stack<bool>,
    supervisors: Stack<Arc<dyn Supervisor>>,
    fork_scopes: Stack<Option<Scope>>,
    async_epoch: u64,
}

impl RunState {
    fn new(environment: Erased, interruptible: bool, supervisor: Arc<dyn Supervisor>) -> Self {
        Self {
            stack: Stack::new(),
            environments: Stack::with(environment),
            interrupt_status: Stack::with(interruptible),
            supervisors: Stack::with(supervisor),
            fork_scopes: Stack::new(),
            async_epoch: 0,
        }
    }

    fn interruptible(&self) -> bool {
        self.interrupt_status.peek().copied().unwrap_or(true)
    }

    fn environment(&self) -> Erased {
        self.environments.peek().cloned().unwrap_or_else(Erased::unit)
    }

    fn supervisor(&self) -> Arc<dyn Supervisor> {
        self.supervisors.peek().cloned().unwrap_or_else(supervisor::none)
    }

    fn fork_scope_override(&self) -> Option<Scope> {
        self.fork_scopes.peek().cloned().flatten()
    }
}

/// The state and interpreter of one fiber.
pub(crate) struct FiberContext {
    id: FiberId,
    platform: Arc<Platform>,
    state: Mutex<FiberState>,
    run_state: Mutex<RunState>,
    scope: Scope,
    locals: Mutex<FiberLocals>,
    supervisor: Arc<dyn Supervisor>,
    report_failure: Option<Reporter>,
    parent_link: Mutex<Option<(Scope, FinalizerKey)>>,
    interrupt_requested: AtomicBool,
}

impl FiberContext {
    fn new(
        platform: Arc<Platform>,
        environment: Erased,
        interruptible: bool,
        supervisor: Arc<dyn Supervisor>,
        locals: FiberLocals,
        report_failure: Option<Reporter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: FiberId::make(),
            platform,
            state: Mutex::new(FiberState::initial()),
            run_state: Mutex::new(RunState::new(environment, interruptible, supervisor.clone())),
            scope: Scope::make(),
            locals: Mutex::new(locals),
            supervisor,
            report_failure,
            parent_link: Mutex::new(None),
            interrupt_requested: AtomicBool::new(false),
        })
    }

    /// Creates a fiber with no parent. It does nothing until
    /// [`start_root`](Self::start_root) is called.
    pub(crate) fn root(platform: Arc<Platform>, environment: Erased) -> Arc<Self> {
        let supervisor = platform.supervisor().clone();
        Self::new(
            platform,
            environment,
            true,
            supervisor,
            FiberLocals::default(),
            None,
        )
    }

    /// Starts a root fiber through `Scheduler::dispatch_now`.
    pub(crate) fn start_root(self: &Arc<Self>, instruction: Instruction) {
        let environment = self.run_state.lock().environment();
        self.supervisor
            .on_start(&environment, &instruction, None, &RuntimeFiber::new(self.clone()));
        tracing::debug!(fiber = %self.id, "root fiber started");
        let fiber = self.clone();
        self.platform
            .scheduler()
            .dispatch_now(Box::new(move || fiber.evaluate_now(instruction)));
    }

    pub(crate) const fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn status(&self) -> Status {
        self.state.lock().status()
    }

    pub(crate) fn poll(&self) -> Option<RawExit> {
        self.state.lock().exit()
    }

    pub(crate) fn locals(&self) -> FiberLocals {
        self.locals.lock().clone()
    }

    /// Registers an observer, or returns the exit if the fiber is done.
    pub(crate) fn observe(&self, observer: Observer) -> Result<ObserverKey, RawExit> {
        self.state.lock().observe(observer)
    }

    /// Removes an observer that has not been called yet.
    pub(crate) fn unobserve(&self, key: ObserverKey) {
        self.state.lock().unobserve(key);
    }

    /// Suspends until this fiber is done, producing its exit.
    ///
    /// If the waiting fiber fails or is interrupted first, its observer is
    /// removed again.
    pub(crate) fn await_exit(self: &Arc<Self>) -> Instruction {
        let target = self.clone();
        Instruction::Suspend(Arc::new(move |_, _| {
            let key_slot: Arc<Mutex<Option<ObserverKey>>> = Arc::default();
            let registered = key_slot.clone();
            let observed = target.clone();
            let suspended = Instruction::Async {
                register: Arc::new(move |resume: Resume| {
                    let observer: Observer = Box::new(move |exit: &RawExit| {
                        resume.resume(Instruction::Succeed(Erased::new(exit.clone())));
                    });
                    match observed.observe(observer) {
                        Ok(key) => {
                            *registered.lock() = Some(key);
                            None
                        }
                        Err(exit) => Some(Instruction::Succeed(Erased::new(exit))),
                    }
                }),
                blocking_on: vec![target.id],
            };
            let cleanup = target.clone();
            Instruction::Fold {
                effect: Arc::new(suspended),
                on_failure: Arc::new(move |cause| {
                    if let Some(key) = key_slot.lock().take() {
                        cleanup.unobserve(key);
                    }
                    Instruction::halt(cause)
                }),
                on_success: Arc::new(Instruction::Succeed),
            }
        }))
    }

    /// Requests interruption on behalf of `by`, then awaits the exit.
    pub(crate) fn interrupt_as(self: &Arc<Self>, by: FiberId) -> Instruction {
        let target = self.clone();
        let awaited = self.clone();
        Instruction::EffectTotal(Arc::new(move || {
            target.interrupt_as_now(by);
            Erased::unit()
        }))
        .flat_map(Arc::new(move |_| awaited.await_exit()))
    }

    /// Records an interruption by `by`.
    ///
    /// A fiber suspended in an interruptible region is resumed right away
    /// with the interrupted cause; otherwise the request is picked up at the
    /// next check of the run loop.
    pub(crate) fn interrupt_as_now(self: &Arc<Self>, by: FiberId) {
        let resume = {
            let mut state = self.state.lock();
            let FiberState::Executing {
                status,
                interrupted,
                ..
            } = &mut *state
            else {
                return;
            };
            *interrupted = std::mem::take(interrupted).then(Cause::interrupt(by));
            self.interrupt_requested.store(true, Ordering::Release);
            let next = match &*status {
                Status::Suspended {
                    previous,
                    interruptible: true,
                    ..
                } if !previous.is_interrupting() && !previous.is_finishing() => {
                    Some(previous.with_interrupting(true))
                }
                _ => None,
            };
            next.map(|next| {
                *status = next;
                interrupted.clone()
            })
        };
        tracing::debug!(fiber = %self.id, by = %by, "interruption requested");
        if let Some(cause) = resume {
            self.evaluate_later(Instruction::halt(cause.widen()));
        }
    }

    /// Runs instructions on the calling thread until the fiber stops.
    fn evaluate_now(self: &Arc<Self>, instruction: Instruction) {
        let mut run = self.run_state.lock();
        let mut current = instruction;
        loop {
            match catch_unwind(AssertUnwindSafe(|| self.run_loop(&mut run, current))) {
                Ok(()) => return,
                Err(payload) => {
                    let defect = Defect::from_panic(payload);
                    tracing::debug!(fiber = %self.id, %defect, "fiber panicked");
                    current = Instruction::halt(Cause::die(defect));
                }
            }
        }
    }

    fn evaluate_later(self: &Arc<Self>, instruction: Instruction) {
        let fiber = self.clone();
        self.platform
            .scheduler()
            .dispatch_later(Box::new(move || fiber.evaluate_now(instruction)));
    }

    fn run_loop(self: &Arc<Self>, run: &mut RunState, instruction: Instruction) {
        let max_operations = self.platform.max_operations();
        let mut operations = 0_usize;
        let mut current = instruction;
        loop {
            if self.should_interrupt(run) {
                self.set_interrupting(true);
                current = Instruction::halt(self.interrupted_cause().widen());
            } else if operations >= max_operations {
                tracing::trace!(fiber = %self.id, "operation budget exhausted");
                self.evaluate_later(current);
                return;
            }
            operations += 1;
            match self.step(run, current) {
                Some(next) => current = next,
                None => return,
            }
        }
    }

    /// Executes one instruction. `None` stops the loop.
    ///
    /// Fields are borrowed and children detached, so the spent node is
    /// released without walking what it used to hold.
    fn step(self: &Arc<Self>, run: &mut RunState, mut instruction: Instruction) -> Option<Instruction> {
        match &mut instruction {
            Instruction::Succeed(value) => self.next_instruction(run, value.clone()),
            Instruction::EffectTotal(thunk) => {
                let value = thunk();
                self.next_instruction(run, value)
            }
            Instruction::EffectPartial { effect, on_panic } => {
                match catch_unwind(AssertUnwindSafe(|| effect())) {
                    Ok(value) => self.next_instruction(run, value),
                    Err(payload) => Some(Instruction::halt(Cause::fail(on_panic(
                        Defect::from_panic(payload),
                    )))),
                }
            }
            Instruction::Fail(make_cause) => self.fail(run, make_cause()),
            Instruction::Async {
                register,
                blocking_on,
            } => {
                let epoch = run.async_epoch;
                run.async_epoch += 1;
                self.enter_async(epoch, run.interruptible(), std::mem::take(blocking_on));
                if self.should_interrupt(run) {
                    if self.exit_async(epoch) {
                        self.set_interrupting(true);
                        return Some(Instruction::halt(self.interrupted_cause().widen()));
                    }
                    return None;
                }
                tracing::trace!(fiber = %self.id, epoch, "fiber suspended");
                match register(Resume {
                    fiber: self.clone(),
                    epoch,
                }) {
                    Some(next) if self.exit_async(epoch) => Some(next),
                    _ => None,
                }
            }
            Instruction::FlatMap {
                effect,
                continuation,
            } => {
                let ready = match &**effect {
                    Instruction::Succeed(value) => Some(value.clone()),
                    Instruction::EffectTotal(thunk) => Some(thunk()),
                    _ => None,
                };
                match ready {
                    Some(value) => Some(continuation(value)),
                    None => {
                        run.stack.push(Frame::Apply(continuation.clone()));
                        Some(Arc::unwrap_or_clone(Instruction::detach(effect)))
                    }
                }
            }
            Instruction::Fold {
                effect,
                on_failure,
                on_success,
            } => {
                run.stack.push(Frame::Fold {
                    on_failure: on_failure.clone(),
                    on_success: on_success.clone(),
                });
                Some(Arc::unwrap_or_clone(Instruction::detach(effect)))
            }
            Instruction::Fork {
                effect,
                scope,
                report_failure,
            } => {
                let child = self.fork(
                    run,
                    Instruction::detach(effect),
                    scope.take(),
                    report_failure.take(),
                );
                self.next_instruction(run, Erased::new(RuntimeFiber::new(child)))
            }
            Instruction::InterruptStatus { effect, status } => {
                run.interrupt_status.push(status.is_interruptible());
                run.stack.push(Frame::InterruptExit);
                Some(Arc::unwrap_or_clone(Instruction::detach(effect)))
            }
            Instruction::Provide {
                environment,
                effect,
            } => {
                run.environments.push(environment.clone());
                run.stack.push(Frame::EnvironmentExit);
                Some(Arc::unwrap_or_clone(Instruction::detach(effect)))
            }
            Instruction::Read(continuation) => Some(continuation(run.environment())),
            Instruction::Descriptor(continuation) => Some(continuation(self.descriptor(run))),
            Instruction::Suspend(make) => Some(make(&self.platform, self.id)),
            Instruction::Yield => {
                tracing::trace!(fiber = %self.id, "fiber yielded");
                self.evaluate_later(Instruction::unit());
                None
            }
            Instruction::Supervise { effect, supervisor } => {
                let combined = supervisor::Both::new(supervisor.clone(), run.supervisor());
                run.supervisors.push(combined);
                run.stack.push(Frame::SupervisorExit);
                Some(Arc::unwrap_or_clone(Instruction::detach(effect)))
            }
            Instruction::OverrideForkScope { effect, scope } => {
                run.fork_scopes.push(scope.take());
                run.stack.push(Frame::ForkScopeExit);
                Some(Arc::unwrap_or_clone(Instruction::detach(effect)))
            }
            Instruction::GetForkScope(continuation) => {
                let scope = run
                    .fork_scope_override()
                    .unwrap_or_else(|| self.scope.clone());
                Some(continuation(scope))
            }
            Instruction::FiberRefModify { fiber_ref, modify } => {
                let current = self.locals.lock().get(fiber_ref);
                let (result, next) = modify(current);
                self.locals.lock().set(fiber_ref, next);
                self.next_instruction(run, result)
            }
            Instruction::RaceWith {
                left,
                right,
                left_wins,
                right_wins,
                scope,
            } => Some(self.race_with(
                run,
                Instruction::detach(left),
                Instruction::detach(right),
                left_wins.clone(),
                right_wins.clone(),
                scope.take(),
            )),
        }
    }

    /// Feeds `value` to the next continuation on the stack.
    fn next_instruction(self: &Arc<Self>, run: &mut RunState, value: Erased) -> Option<Instruction> {
        loop {
            match run.stack.pop() {
                Some(Frame::Apply(continuation)) => return Some(continuation(value)),
                Some(Frame::Fold { on_success, .. }) => return Some(on_success(value)),
                Some(Frame::InterruptExit) => {
                    run.interrupt_status.pop();
                    // Goes back through the loop so a pending interruption is
                    // seen before the next continuation runs.
                    return Some(Instruction::Succeed(value));
                }
                Some(Frame::EnvironmentExit) => {
                    run.environments.pop();
                }
                Some(Frame::SupervisorExit) => {
                    run.supervisors.pop();
                }
                Some(Frame::ForkScopeExit) => {
                    run.fork_scopes.pop();
                }
                None => return self.done(Exit::Success(value)),
            }
        }
    }

    fn fail(self: &Arc<Self>, run: &mut RunState, cause: Cause<Erased>) -> Option<Instruction> {
        let (handler, discarded) = self.unwind_stack(run);
        let cause = if discarded {
            cause.strip_failures().widen()
        } else {
            cause
        };
        if let Some(handler) = handler {
            self.set_interrupting(false);
            return Some(handler(cause));
        }
        let interrupted = self.interrupted_cause();
        let cause = if interrupted.interruptors().is_subset(&cause.interruptors()) {
            cause
        } else {
            cause.then(interrupted.widen())
        };
        self.set_interrupting(true);
        self.done(Exit::Failure(cause))
    }

    /// Pops frames until a failure handler is found, restoring every stack
    /// popped on the way. The flag tells whether a handler was skipped
    /// because the fiber is being interrupted.
    fn unwind_stack(&self, run: &mut RunState) -> (Option<FailureHandler>, bool) {
        let mut discarded = false;
        while let Some(frame) = run.stack.pop() {
            match frame {
                Frame::Fold { on_failure, .. } => {
                    if self.should_interrupt(run) {
                        discarded = true;
                    } else {
                        return (Some(on_failure), discarded);
                    }
                }
                Frame::InterruptExit => {
                    run.interrupt_status.pop();
                }
                Frame::EnvironmentExit => {
                    run.environments.pop();
                }
                Frame::SupervisorExit => {
                    run.supervisors.pop();
                }
                Frame::ForkScopeExit => {
                    run.fork_scopes.pop();
                }
                Frame::Apply(_) => {}
            }
        }
        (None, discarded)
    }

    /// Completes the fiber once its scope is closed, or closes the scope
    /// first.
    fn done(self: &Arc<Self>, exit: RawExit) -> Option<Instruction> {
        if !self.scope.is_closed() {
            self.set_finishing();
            return Some(self.close_scope(exit));
        }

        let observers = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, FiberState::Done(exit.clone())) {
                FiberState::Executing { observers, .. } => observers,
                done @ FiberState::Done(_) => {
                    *state = done;
                    return None;
                }
            }
        };
        if let Some((scope, key)) = self.parent_link.lock().take() {
            scope.deny(key);
        }

        let fiber = RuntimeFiber::new(self.clone());
        let notified = catch_unwind(AssertUnwindSafe(|| {
            self.supervisor.on_end(&exit, &fiber);
            self.report_unhandled(&exit);
        }));
        if let Err(payload) = notified {
            let defect = Defect::from_panic(payload);
            tracing::error!(fiber = %self.id, %defect, "supervisor or failure reporter panicked");
        }
        tracing::debug!(
            fiber = %self.id,
            success = exit.is_success(),
            interrupted = exit.is_interrupted(),
            "fiber done"
        );
        notify_observers(observers, &exit);
        None
    }

    fn report_unhandled(&self, exit: &RawExit) {
        let Exit::Failure(cause) = exit else {
            return;
        };
        if cause.interrupted_only() {
            return;
        }
        match &self.report_failure {
            Some(report) => report(cause),
            None => self.platform.report_failure(cause),
        }
    }

    /// Closes the fiber's own scope, then completes with `exit` extended by
    /// any finalizer failures.
    fn close_scope(&self, exit: RawExit) -> Instruction {
        self.scope
            .close_collecting(exit.clone())
            .into_instruction()
            .flat_map(Arc::new(move |closed: Erased| {
                let failures = closed
                    .downcast_ref::<(bool, Cause<Infallible>)>()
                    .map(|(_, failures)| failures.clone())
                    .unwrap_or_default();
                let exit = match exit.clone() {
                    Exit::Success(_) if !failures.is_empty() => Exit::Failure(failures.widen()),
                    Exit::Failure(cause) => Exit::Failure(cause.then(failures.widen())),
                    success @ Exit::Success(_) => success,
                };
                Instruction::done(exit)
            }))
            .with_interrupt_status(InterruptStatus::Uninterruptible)
    }

    /// Creates a child fiber, links it to its scope and schedules its start.
    fn fork(
        self: &Arc<Self>,
        run: &RunState,
        effect: Arc<Instruction>,
        scope: Option<Scope>,
        report_failure: Option<Reporter>,
    ) -> Arc<Self> {
        let environment = run.environment();
        let child = Self::new(
            self.platform.clone(),
            environment.clone(),
            run.interruptible(),
            run.supervisor(),
            self.locals.lock().fork(),
            report_failure,
        );
        let instruction = Arc::unwrap_or_clone(effect);
        child.supervisor.on_start(
            &environment,
            &instruction,
            Some(&RuntimeFiber::new(self.clone())),
            &RuntimeFiber::new(child.clone()),
        );

        let parent_scope = scope
            .or_else(|| run.fork_scope_override())
            .unwrap_or_else(|| self.scope.clone());
        if !parent_scope.is_global() {
            let parent_id = self.id;
            let weak_child = Arc::downgrade(&child);
            let link = parent_scope.add_finalizer_raw(Box::new(move |exit: &RawExit| {
                let by = first_interruptor(exit).unwrap_or(parent_id);
                weak_child.upgrade().map_or_else(Instruction::unit, |child| {
                    child
                        .interrupt_as(by)
                        .flat_map(Arc::new(|_| Instruction::unit()))
                })
            }));
            match link {
                Ok(key) => *child.parent_link.lock() = Some((parent_scope, key)),
                Err(exit) => child.interrupt_as_now(first_interruptor(&exit).unwrap_or(parent_id)),
            }
        }

        tracing::debug!(parent = %self.id, child = %child.id, "fiber forked");
        child.evaluate_later(instruction);
        child
    }

    fn race_with(
        self: &Arc<Self>,
        run: &RunState,
        left: Arc<Instruction>,
        right: Arc<Instruction>,
        left_wins: RaceContinuation,
        right_wins: RaceContinuation,
        scope: Option<Scope>,
    ) -> Instruction {
        let raced = Arc::new(AtomicBool::new(false));
        let left = self.fork(run, left, scope.clone(), None);
        let right = self.fork(run, right, scope, None);
        let blocking_on = vec![left.id, right.id];
        Instruction::Async {
            register: Arc::new(move |resume: Resume| {
                arbiter(&left, &right, &left_wins, &raced, &resume)
                    .or_else(|| arbiter(&right, &left, &right_wins, &raced, &resume))
            }),
            blocking_on,
        }
    }

    fn descriptor(&self, run: &RunState) -> Descriptor {
        let (status, interrupted) = {
            let state = self.state.lock();
            (state.status(), state.interrupted())
        };
        Descriptor {
            id: self.id,
            status,
            interruptors: interrupted.interruptors(),
            interrupt_status: InterruptStatus::from_flag(run.interruptible()),
            scope: self.scope.clone(),
        }
    }

    fn should_interrupt(&self, run: &RunState) -> bool {
        if !self.interrupt_requested.load(Ordering::Acquire) || !run.interruptible() {
            return false;
        }
        match &*self.state.lock() {
            FiberState::Executing { status, .. } => {
                !status.is_interrupting() && !status.is_finishing()
            }
            FiberState::Done(_) => false,
        }
    }

    fn interrupted_cause(&self) -> Cause<Infallible> {
        self.state.lock().interrupted()
    }

    fn set_interrupting(&self, interrupting: bool) {
        if let FiberState::Executing { status, .. } = &mut *self.state.lock() {
            *status = status.with_interrupting(interrupting);
        }
    }

    fn set_finishing(&self) {
        if let FiberState::Executing { status, .. } = &mut *self.state.lock() {
            *status = Status::Finishing {
                interrupting: status.is_interrupting(),
            };
        }
    }

    fn enter_async(&self, epoch: u64, interruptible: bool, blocking_on: Vec<FiberId>) {
        if let FiberState::Executing { status, .. } = &mut *self.state.lock() {
            let previous = std::mem::replace(status, Status::Done);
            *status = previous.suspend(interruptible, epoch, blocking_on);
        }
    }

    /// Leaves the suspension for `epoch`. Returns `false` if the epoch was
    /// already consumed, by a resumption or an interruption.
    fn exit_async(&self, epoch: u64) -> bool {
        let mut state = self.state.lock();
        let FiberState::Executing { status, .. } = &mut *state else {
            return false;
        };
        if !matches!(status, Status::Suspended { epoch: current, .. } if *current == epoch) {
            return false;
        }
        if let Status::Suspended { previous, .. } = std::mem::replace(status, Status::Done) {
            *status = *previous;
        }
        true
    }
}

/// Registers `continuation` to run when `winner` finishes first.
fn arbiter(
    winner: &Arc<FiberContext>,
    loser: &Arc<FiberContext>,
    continuation: &RaceContinuation,
    raced: &Arc<AtomicBool>,
    resume: &Resume,
) -> Option<Instruction> {
    let observer: Observer = {
        let loser = loser.clone();
        let continuation = continuation.clone();
        let raced = raced.clone();
        let resume = resume.clone();
        Box::new(move |exit: &RawExit| {
            if !raced.swap(true, Ordering::AcqRel) {
                let exit = exit.clone();
                resume.resume(Instruction::Suspend(Arc::new(move |_, _| {
                    continuation(exit.clone(), RuntimeFiber::new(loser.clone()))
                })));
            }
        })
    };
    match winner.observe(observer) {
        Ok(_) => None,
        Err(exit) if !raced.swap(true, Ordering::AcqRel) => {
            Some(continuation(exit, RuntimeFiber::new(loser.clone())))
        }
        Err(_) => None,
    }
}

fn first_interruptor(exit: &RawExit) -> Option<FiberId> {
    exit.cause()?.leaves().find_map(|leaf| match leaf {
        Leaf::Interrupt(fiber_id) => Some(fiber_id),
        _ => None,
    })
}

/// Resumes a suspended fiber.
///
/// Handed to the `register` function of an [`Instruction::Async`]. Only the
/// first resumption for a given suspension has an effect; later ones, and
/// any made after the fiber was interrupted, are ignored.
#[derive(Clone)]
pub struct Resume {
    fiber: Arc<FiberContext>,
    epoch: u64,
}

impl Resume {
    /// Continues the fiber with `instruction`. Returns `false` if the
    /// suspension was already resumed.
    pub fn resume(&self, instruction: Instruction) -> bool {
        if self.fiber.exit_async(self.epoch) {
            self.fiber.evaluate_later(instruction);
            true
        } else {
            false
        }
    }

    /// The id of the suspended fiber.
    #[must_use]
    pub fn fiber_id(&self) -> FiberId {
        self.fiber.id
    }
}

impl std::fmt::Debug for Resume {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Resume")
            .field("fiber", &self.fiber.id)
            .field("epoch", &self.epoch)
            .finish()
    }
}
