//! Forking, racing and parallel composition.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Callback, Data, Effect, Instruction, Registration, UIO, URIO, typed_cause, typed_exit};
use crate::cause::Cause;
use crate::exit::Exit;
use crate::fiber::{Fiber, RuntimeFiber};
use crate::runtime::{Reporter, Supervisor};
use crate::scope::Scope;

impl<R: Data, E: Data, A: Data> Effect<R, E, A> {
    /// Starts the effect on a new fiber, linked to the current fork scope.
    ///
    /// The child inherits the environment, the interrupt status, the
    /// supervisor and a fork of every fiber-local value. It is interrupted
    /// when the scope closes, which by default is when the forking fiber
    /// finishes.
    pub fn fork(self) -> URIO<R, Fiber<E, A>> {
        self.fork_with(None, None)
    }

    /// Starts the effect on a new fiber that outlives the forking fiber.
    pub fn fork_daemon(self) -> URIO<R, Fiber<E, A>> {
        self.fork_with(Some(Scope::global()), None)
    }

    /// Starts the effect on a new fiber linked to `scope`.
    pub fn fork_in(self, scope: Scope) -> URIO<R, Fiber<E, A>> {
        self.fork_with(Some(scope), None)
    }

    /// Starts the effect on a new fiber whose unhandled failures go to
    /// `handler` instead of the platform reporter.
    pub fn fork_with_error_handler(
        self,
        handler: impl Fn(&Cause<E>) + Send + Sync + 'static,
    ) -> URIO<R, Fiber<E, A>> {
        let reporter: Reporter = Arc::new(move |cause| handler(&typed_cause::<E>(cause)));
        self.fork_with(None, Some(reporter))
    }

    fn fork_with(self, scope: Option<Scope>, report_failure: Option<Reporter>) -> URIO<R, Fiber<E, A>> {
        URIO::<R, RuntimeFiber>::from_instruction(Instruction::Fork {
            effect: Arc::new(self.into_instruction()),
            scope,
            report_failure,
        })
        .map(RuntimeFiber::typed::<E, A>)
    }

    /// Runs `self` and `that` concurrently and continues with whichever
    /// finishes first, handing over the other, still running, fiber.
    ///
    /// The loser is not interrupted; the continuation decides what happens
    /// to it.
    pub fn race_with<E2: Data, B: Data, E3: Data, C: Data>(
        self,
        that: Effect<R, E2, B>,
        left_done: impl Fn(Exit<E, A>, Fiber<E2, B>) -> Effect<R, E3, C> + Send + Sync + 'static,
        right_done: impl Fn(Exit<E2, B>, Fiber<E, A>) -> Effect<R, E3, C> + Send + Sync + 'static,
    ) -> Effect<R, E3, C> {
        Effect::from_instruction(Instruction::RaceWith {
            left: Arc::new(self.into_instruction()),
            right: Arc::new(that.into_instruction()),
            left_wins: Arc::new(move |exit, loser| {
                left_done(typed_exit(exit), loser.typed()).into_instruction()
            }),
            right_wins: Arc::new(move |exit, loser| {
                right_done(typed_exit(exit), loser.typed()).into_instruction()
            }),
            scope: None,
        })
    }

    /// Runs both effects concurrently and keeps the first success.
    ///
    /// The loser is interrupted once a side succeeds. If the first side to
    /// finish fails, the other one decides the outcome; if both fail, the
    /// causes are combined in parallel.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use strand::effect::UIO;
    /// use strand::runtime::Runtime;
    ///
    /// let slow = UIO::sleep(Duration::from_millis(50)).as_value("slow");
    /// let fast = UIO::sleep(Duration::from_millis(1)).as_value("fast");
    /// let exit = Runtime::default().run_blocking(slow.race(fast));
    /// assert_eq!(exit.into_result().unwrap(), "fast");
    /// ```
    pub fn race(self, that: Self) -> Self {
        self.race_with(that, race_winner, race_winner)
    }

    /// Runs both effects concurrently and completes like whichever finishes
    /// first, success or failure, interrupting the other.
    pub fn race_first(self, that: Self) -> Self {
        self.race_with(that, first_finisher, first_finisher)
    }

    /// Runs both effects concurrently, combining their values.
    ///
    /// If either side fails, the other is interrupted and the failure is
    /// reported, combined with whatever the interrupted side produced.
    pub fn zip_with_par<B: Data, C: Data>(
        self,
        that: Effect<R, E, B>,
        f: impl Fn(A, B) -> C + Send + Sync + 'static,
    ) -> Effect<R, E, C> {
        let f = Arc::new(f);
        let g = f.clone();
        self.race_with(
            that,
            move |exit, right| {
                let f = f.clone();
                coordinate(exit, right, true, move |a, b| f(a, b))
            },
            move |exit, left| {
                let g = g.clone();
                coordinate(exit, left, false, move |b, a| g(a, b))
            },
        )
    }

    /// Runs both effects concurrently, keeping both values.
    pub fn zip_par<B: Data>(self, that: Effect<R, E, B>) -> Effect<R, E, (A, B)> {
        self.zip_with_par(that, |a, b| (a, b))
    }

    /// Completes with `None` if the effect does not finish within
    /// `duration`, interrupting it.
    pub fn timeout(self, duration: Duration) -> Effect<R, E, Option<A>> {
        let timer = Effect::<R, E, ()>::sleep(duration).map(|()| None);
        self.map(Some).race_first(timer)
    }

    /// Fails with `error` if the effect does not finish within `duration`.
    pub fn timeout_fail(self, duration: Duration, error: E) -> Self {
        self.timeout(duration).flat_map(move |value| match value {
            Some(value) => Self::succeed(value),
            None => Self::fail(error.clone()),
        })
    }

    /// Runs the effect with `supervisor` watching every fiber it forks.
    pub fn supervised(self, supervisor: Arc<dyn Supervisor>) -> Self {
        Self::from_instruction(Instruction::Supervise {
            effect: Arc::new(self.into_instruction()),
            supervisor,
        })
    }

    /// Runs the effect with children forked into `scope`.
    pub fn override_fork_scope(self, scope: Scope) -> Self {
        Self::from_instruction(Instruction::OverrideForkScope {
            effect: Arc::new(self.into_instruction()),
            scope: Some(scope),
        })
    }

    /// Runs the effect with children forked into the fiber's own scope,
    /// undoing an enclosing [`override_fork_scope`](Self::override_fork_scope).
    pub fn reset_fork_scope(self) -> Self {
        Self::from_instruction(Instruction::OverrideForkScope {
            effect: Arc::new(self.into_instruction()),
            scope: None,
        })
    }
}

impl<R: Data, E: Data> Effect<R, E, Scope> {
    /// Reads the scope new children are linked to.
    pub fn fork_scope() -> Self {
        Self::from_instruction(Instruction::GetForkScope(Arc::new(|scope| {
            Instruction::succeed(super::Erased::new(scope))
        })))
    }
}

impl<R: Data, E: Data, B: Data> Effect<R, E, Vec<B>> {
    /// Runs `f` for every item on its own fiber, collecting the values in
    /// item order.
    ///
    /// As soon as one fiber fails, the others are interrupted and the
    /// failures are combined in parallel.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::effect::UIO;
    /// use strand::runtime::Runtime;
    ///
    /// let program = UIO::foreach_par(1..=4, |n: u32| UIO::succeed(n * n));
    /// let exit = Runtime::default().run_blocking(program);
    /// assert_eq!(exit.into_result().unwrap(), vec![1, 4, 9, 16]);
    /// ```
    pub fn foreach_par<T: Data>(
        items: impl IntoIterator<Item = T>,
        f: impl Fn(T) -> Effect<R, E, B> + Send + Sync + 'static,
    ) -> Self {
        let items: Vec<T> = items.into_iter().collect();
        let f = Arc::new(f);
        Effect::<R, E, Scope>::fork_scope().flat_map(move |scope| {
            let f = f.clone();
            Self::foreach_par_in(items.clone(), move |item| f(item), scope)
        })
    }

    /// Like [`foreach_par`](Self::foreach_par), with the fibers linked to
    /// `scope`.
    pub fn foreach_par_in<T: Data>(
        items: impl IntoIterator<Item = T>,
        f: impl Fn(T) -> Effect<R, E, B> + Send + Sync + 'static,
        scope: Scope,
    ) -> Self {
        let items: Vec<T> = items.into_iter().collect();
        let f = Arc::new(f);
        Self::uninterruptible_mask(move |restore| {
            let gate = Arc::new(Mutex::new(Gate::new(items.len())));
            let f = f.clone();
            let scope = scope.clone();
            let arrival = gate.clone();
            let forks = URIO::<R, Vec<Fiber<E, B>>>::foreach(items.clone(), move |item| {
                let arrival = arrival.clone();
                restore
                    .apply(f(item))
                    .on_exit(move |exit| arrive(&arrival, exit.is_failure()).lift())
                    .fork_with(Some(scope.clone()), Some(silent()))
            });
            forks.widen::<E>().flat_map(move |fibers: Vec<Fiber<E, B>>| {
                let gate = gate.clone();
                let waiting = fibers.clone();
                restore
                    .apply(wait(&gate).lift().widen::<E>())
                    .catch_all_cause(move |cause| {
                        interrupt_all(waiting.clone())
                            .widen()
                            .zip_right(Effect::<R, E, ()>::halt(cause))
                    })
                    .flat_map(move |()| {
                        if gate.lock().failed {
                            interrupt_all(fibers.clone())
                                .widen()
                                .flat_map(|exits| Self::halt(parallel_failure(exits)))
                        } else {
                            Self::foreach(fibers.clone(), |fiber: Fiber<E, B>| fiber.join().lift())
                        }
                    })
            })
        })
    }
}

/// Failures of traversal fibers are reported through their parent.
fn silent() -> Reporter {
    Arc::new(|_| {})
}

/// Tracks the fibers of a parallel traversal that have not finished yet.
struct Gate {
    remaining: usize,
    failed: bool,
    waiter: Option<Callback<(), Infallible, ()>>,
}

impl Gate {
    const fn new(remaining: usize) -> Self {
        Self {
            remaining,
            failed: false,
            waiter: None,
        }
    }

    const fn is_open(&self) -> bool {
        self.remaining == 0 || self.failed
    }
}

fn arrive(gate: &Arc<Mutex<Gate>>, failed: bool) -> UIO<()> {
    let gate = gate.clone();
    UIO::sync(move || {
        let waiter = {
            let mut gate = gate.lock();
            gate.remaining = gate.remaining.saturating_sub(1);
            gate.failed |= failed;
            if gate.is_open() { gate.waiter.take() } else { None }
        };
        if let Some(waiter) = waiter {
            waiter.succeed(());
        }
    })
}

fn wait(gate: &Arc<Mutex<Gate>>) -> UIO<()> {
    let gate = gate.clone();
    UIO::async_register(move |callback| {
        let mut gate = gate.lock();
        if gate.is_open() {
            Registration::Ready(UIO::unit())
        } else {
            gate.waiter = Some(callback);
            Registration::Pending
        }
    })
}

fn interrupt_all<R: Data, E: Data, B: Data>(fibers: Vec<Fiber<E, B>>) -> URIO<R, Vec<Exit<E, B>>> {
    URIO::foreach(fibers, |fiber: Fiber<E, B>| fiber.interrupt().lift())
}

/// Combines the failures of a parallel traversal, preferring the fibers
/// that failed on their own over the ones interrupted because of them.
fn parallel_failure<E: Data, B: Data>(exits: Vec<Exit<E, B>>) -> Cause<E> {
    let causes: Vec<Cause<E>> = exits
        .into_iter()
        .filter_map(|exit| match exit {
            Exit::Failure(cause) => Some(cause),
            Exit::Success(_) => None,
        })
        .collect();
    let own: Vec<&Cause<E>> = causes.iter().filter(|cause| !cause.interrupted_only()).collect();
    let chosen: Vec<&Cause<E>> = if own.is_empty() { causes.iter().collect() } else { own };
    chosen
        .into_iter()
        .fold(Cause::empty(), |acc, cause| acc.both(cause.clone()))
}

fn race_winner<R: Data, E: Data, A: Data>(exit: Exit<E, A>, loser: Fiber<E, A>) -> Effect<R, E, A> {
    match exit {
        Exit::Success(value) => loser.interrupt().lift().widen().as_value(value),
        Exit::Failure(cause) => loser
            .join()
            .catch_all_cause(move |other| Effect::halt(cause.clone().both(other)))
            .lift(),
    }
}

fn first_finisher<R: Data, E: Data, A: Data>(exit: Exit<E, A>, loser: Fiber<E, A>) -> Effect<R, E, A> {
    loser
        .interrupt()
        .lift()
        .widen()
        .zip_right(Effect::from_exit(exit))
}

fn coordinate<R: Data, E: Data, A: Data, B: Data, C: Data>(
    winner: Exit<E, A>,
    loser: Fiber<E, B>,
    winner_is_left: bool,
    f: impl Fn(A, B) -> C + Send + Sync + 'static,
) -> Effect<R, E, C> {
    match winner {
        Exit::Success(a) => loser.join().lift().map(move |b| f(a.clone(), b)),
        Exit::Failure(cause) => loser
            .interrupt()
            .lift()
            .widen()
            .flat_map(move |loser_exit: Exit<E, B>| match loser_exit {
                Exit::Success(_) => Effect::halt(cause.clone()),
                Exit::Failure(other) if winner_is_left => Effect::halt(cause.clone().both(other)),
                Exit::Failure(other) => Effect::halt(other.both(cause.clone())),
            }),
    }
}
