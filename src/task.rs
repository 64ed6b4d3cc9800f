//! Tasks: resumable computations owned by a manager.
//!
//! A task is any `'static` Rust future. Its frame lives in the manager's task
//! table and is polled whenever an awaiter it registered on settles. Tasks
//! are not `Send` and never leave their manager's thread.

use std::future::Future as StdFuture;

use tracing::trace;

use crate::awaiter::TaskKey;
use crate::future::Future;
use crate::manager::Handle;
use crate::manager::core::{Core, Frame};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TaskState {
    /// Spawned for a later iteration, not polled yet.
    Queued,
    /// Parked at an await point.
    Suspended,
    /// Frame is out of the table and on the call stack.
    Running,
    /// Finished while an attached handle still exists.
    Done,
}

pub(crate) struct TaskSlot {
    frame: Option<Frame>,
    state: TaskState,
    /// An external [`TaskHandle`] controls destruction.
    attached: bool,
    /// Destroyed while running; the frame is dropped once it yields.
    cancelled: bool,
}

impl Core {
    fn insert_task(&mut self, frame: Frame, state: TaskState) -> TaskKey {
        TaskKey(self.tasks.insert(TaskSlot {
            frame: Some(frame),
            state,
            attached: true,
            cancelled: false,
        }))
    }

    /// Check a frame out for polling. `None` if the task is gone, finished,
    /// or already on the stack.
    pub(crate) fn take_frame(&mut self, task: TaskKey) -> Option<Frame> {
        let slot = self.tasks.get_mut(task.0)?;
        if matches!(slot.state, TaskState::Running | TaskState::Done) {
            return None;
        }
        let frame = slot.frame.take()?;
        slot.state = TaskState::Running;
        Some(frame)
    }

    /// Check a polled frame back in. Returns the frame when it must be
    /// dropped by the caller.
    pub(crate) fn return_frame(&mut self, task: TaskKey, frame: Frame, finished: bool) -> Option<Frame> {
        let Some(slot) = self.tasks.get_mut(task.0) else {
            return Some(frame);
        };
        if finished {
            if slot.attached {
                slot.state = TaskState::Done;
            } else {
                self.tasks.remove(task.0);
            }
            return Some(frame);
        }
        if slot.cancelled {
            // Self-cancellation: the frame may still be referenced further up
            // this call stack's bookkeeping, so it dies in step (7).
            self.tasks.remove(task.0);
            self.deferred.push(frame);
            return None;
        }
        slot.state = TaskState::Suspended;
        slot.frame = Some(frame);
        None
    }

    /// Handle side went away: destroy an idle frame, defer a running one.
    fn release_task(&mut self, task: TaskKey) -> Option<Frame> {
        let slot = self.tasks.get_mut(task.0)?;
        match slot.state {
            TaskState::Running => {
                slot.cancelled = true;
                slot.attached = false;
                None
            }
            TaskState::Done => {
                self.tasks.remove(task.0);
                None
            }
            TaskState::Queued | TaskState::Suspended => self.tasks.remove(task.0)?.frame,
        }
    }

    fn detach_task(&mut self, task: TaskKey) {
        let Some(slot) = self.tasks.get_mut(task.0) else {
            return;
        };
        if slot.state == TaskState::Done {
            self.tasks.remove(task.0);
        } else {
            slot.attached = false;
        }
    }

    fn task_done(&self, task: TaskKey) -> bool {
        self.tasks
            .get(task.0)
            .is_none_or(|slot| slot.state == TaskState::Done || slot.cancelled)
    }
}

/// Attached ownership of a task.
///
/// Dropping the handle cancels the task: an idle frame is destroyed at once
/// (dropping every future it holds), a frame that is currently executing is
/// destroyed after it next suspends. Use [`TaskHandle::detach`] to let the
/// task run to completion on its own.
#[must_use = "dropping a TaskHandle cancels the task"]
pub struct TaskHandle {
    handle: Handle,
    key: Option<TaskKey>,
}

impl TaskHandle {
    /// Has the task finished (or been cancelled)?
    pub fn is_done(&self) -> bool {
        match self.key {
            Some(key) => self.handle.with_core(|c| c.task_done(key)),
            None => true,
        }
    }

    /// Let the task own itself; it is destroyed when it completes.
    pub fn detach(mut self) {
        if let Some(key) = self.key.take() {
            self.handle.with_core(|c| c.detach_task(key));
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let frame = self.handle.with_core(|c| c.release_task(key));
            drop(frame);
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

impl Handle {
    fn task_handle(&self, key: TaskKey) -> TaskHandle {
        TaskHandle {
            handle: self.clone(),
            key: Some(key),
        }
    }

    /// Run `task` right away until its first suspension, then return.
    pub fn spawn_now<F>(&self, task: F) -> TaskHandle
    where
        F: StdFuture<Output = ()> + 'static,
    {
        let key = self.with_core(|c| c.insert_task(Box::pin(task), TaskState::Suspended));
        trace!(?key, "spawn_now");
        // Not subject to the inline depth limit: callers rely on the first
        // segment having run when this returns.
        self.poll_task(key);
        self.task_handle(key)
    }

    /// Queue `task` to start in step (1) of the next iteration.
    pub fn spawn_later<F>(&self, task: F) -> TaskHandle
    where
        F: StdFuture<Output = ()> + 'static,
    {
        let key = self.with_core(|c| {
            let key = c.insert_task(Box::pin(task), TaskState::Queued);
            c.starts.push_back(key);
            key
        });
        trace!(?key, "spawn_later");
        self.task_handle(key)
    }

    /// [`spawn_later`](Self::spawn_later) a task that owns itself.
    pub fn async_spawn<F>(&self, task: F)
    where
        F: StdFuture<Output = ()> + 'static,
    {
        self.spawn_later(task).detach();
    }

    /// Spawn `task` for the next iteration; its output resolves the returned
    /// future. Cancelling the task rejects that future with
    /// [`Error::Abandoned`](crate::Error::Abandoned).
    pub fn spawn_with_output<F>(&self, task: F) -> (TaskHandle, Future<F::Output>)
    where
        F: StdFuture + 'static,
        F::Output: 'static,
    {
        let mut out = Future::new();
        let promise = self.make_future(&mut out);
        let handle = self.spawn_later(async move {
            promise.resolve(task.await);
        });
        (handle, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Manager;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    struct Flag(Rc<Cell<bool>>);

    impl Drop for Flag {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    #[test]
    fn spawn_now_runs_to_first_suspension() {
        let m = Manager::new();
        let h = m.handle();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let mut gate = Future::<u8>::new();
        let promise = m.make_future(&mut gate);
        let task = m.spawn_now(async move {
            l.borrow_mut().push("before");
            let v = (&mut gate).await.unwrap();
            l.borrow_mut().push(if v == 1 { "after" } else { "wrong" });
            drop(h);
        });
        assert_eq!(*log.borrow(), vec!["before"]);
        assert!(!task.is_done());
        assert!(promise.resolve(1));
        assert_eq!(*log.borrow(), vec!["before", "after"]);
        assert!(task.is_done());
    }

    #[test]
    fn spawn_later_waits_for_drive() {
        let m = Manager::new();
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        let task = m.spawn_later(async move { r.set(true) });
        assert!(!ran.get());
        assert!(!task.is_done());
        m.drive();
        assert!(ran.get());
        assert!(task.is_done());
        assert_eq!(m.stats().tasks, 1);
        drop(task);
        assert_eq!(m.stats().tasks, 0);
    }

    #[test]
    fn dropping_handle_destroys_idle_frame() {
        let m = Manager::new();
        let dropped = Rc::new(Cell::new(false));
        let flag = Flag(Rc::clone(&dropped));
        let h = m.handle();
        let task = m.spawn_now(async move {
            let _flag = flag;
            let _ = h.timeout(std::time::Duration::from_secs(60)).await;
        });
        assert_eq!(m.stats().armed_clocks, 1);
        drop(task);
        assert!(dropped.get());
        assert_eq!(m.stats().armed_clocks, 0);
        assert_eq!(m.stats().live_awaiters, 0);
    }

    #[test]
    fn self_cancellation_is_deferred() {
        let m = Manager::new();
        let h = m.handle();
        let slot: Rc<RefCell<Option<TaskHandle>>> = Rc::new(RefCell::new(None));
        let dropped = Rc::new(Cell::new(false));
        let (s, flag) = (Rc::clone(&slot), Flag(Rc::clone(&dropped)));
        let d = Rc::clone(&dropped);
        let task = m.spawn_later(async move {
            let _flag = flag;
            drop(s.borrow_mut().take());
            // Still alive: destruction waits until this frame is off the stack.
            assert!(!d.get());
            let _ = h.timeout(std::time::Duration::from_secs(60)).await;
            unreachable!("cancelled task resumed");
        });
        *slot.borrow_mut() = Some(task);
        m.drive();
        assert!(dropped.get());
        assert_eq!(m.stats().tasks, 0);
        assert_eq!(m.stats().armed_clocks, 0);
    }

    #[test]
    fn detached_task_frees_itself() {
        let m = Manager::new();
        let mut gate = Future::<()>::new();
        let promise = m.make_future(&mut gate);
        m.spawn_now(async move {
            let _ = (&mut gate).await;
        })
        .detach();
        assert_eq!(m.stats().tasks, 1);
        promise.resolve(());
        assert_eq!(m.stats().tasks, 0);
    }

    #[test]
    fn spawn_with_output_delivers_value() {
        let m = Manager::new();
        let h = m.handle();
        let (task, mut out) = m.spawn_with_output(async { 6 * 7 });
        let v = m.block_on(async move {
            let _ = h;
            (&mut out).await
        });
        assert_eq!(v, Ok(42));
        assert!(task.is_done());
    }

    #[test]
    fn cancelled_output_task_abandons_future() {
        let m = Manager::new();
        let h = m.handle();
        let (task, mut out) = m.spawn_with_output(async move {
            let _ = h.timeout(std::time::Duration::from_secs(60)).await;
            1
        });
        m.drive();
        drop(task);
        let v = m.block_on(async move { (&mut out).await });
        assert_eq!(v, Err(crate::Error::Abandoned));
    }
}
