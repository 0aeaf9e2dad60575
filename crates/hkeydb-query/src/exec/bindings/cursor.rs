//! Streams of query bindings.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use super::QueryBindings;
use crate::error::{ExecError, ExecResult};

/// A stream of [`QueryBindings`].
///
/// The stream is opened, read until it returns `None`, and closed. A
/// consumer that abandons a scope calls [`cancel_bindings`](Self::cancel_bindings)
/// with it, after which no bindings descending from that scope are returned.
pub trait QueryBindingsCursor: Send {
    /// Starts the stream.
    ///
    /// # Errors
    ///
    /// Propagates errors from the underlying source.
    fn open_bindings(&mut self) -> ExecResult<()>;

    /// Returns the next bindings, or `None` when the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates errors from the underlying source.
    fn next_bindings(&mut self) -> ExecResult<Option<QueryBindings>>;

    /// Ends the stream.
    ///
    /// # Errors
    ///
    /// Propagates errors from the underlying source.
    fn close_bindings(&mut self) -> ExecResult<()>;

    /// Discards every pending bindings that descends from `bindings`.
    ///
    /// # Errors
    ///
    /// Propagates errors from the underlying source.
    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecResult<()>;
}

#[derive(Debug)]
struct Singleton {
    bindings: Option<QueryBindings>,
    pending: bool,
}

/// A bindings stream that yields one fixed scope.
///
/// Clones share state, so the owner of a cursor tree can keep a handle and
/// [`reset`](Self::reset) the scope between executions while the tree holds
/// another handle as its bindings source.
#[derive(Debug, Clone)]
pub struct SingletonQueryBindingsCursor {
    state: Arc<Mutex<Singleton>>,
}

impl SingletonQueryBindingsCursor {
    /// Creates a stream yielding `bindings` once per open.
    #[must_use]
    pub fn new(bindings: Option<QueryBindings>) -> Self {
        Self { state: Arc::new(Mutex::new(Singleton { bindings, pending: false })) }
    }

    /// Replaces the scope and makes it pending again.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::LockPoisoned`] if the shared state is poisoned.
    pub fn reset(&self, bindings: QueryBindings) -> ExecResult<()> {
        let mut state = self.lock()?;
        state.bindings = Some(bindings);
        state.pending = true;
        Ok(())
    }

    fn lock(&self) -> ExecResult<MutexGuard<'_, Singleton>> {
        self.state.lock().map_err(|_| ExecError::LockPoisoned)
    }
}

impl QueryBindingsCursor for SingletonQueryBindingsCursor {
    fn open_bindings(&mut self) -> ExecResult<()> {
        let mut state = self.lock()?;
        state.pending = state.bindings.is_some();
        Ok(())
    }

    fn next_bindings(&mut self) -> ExecResult<Option<QueryBindings>> {
        let mut state = self.lock()?;
        if !state.pending {
            return Ok(None);
        }
        state.pending = false;
        Ok(state.bindings.clone())
    }

    fn close_bindings(&mut self) -> ExecResult<()> {
        self.lock()?.pending = false;
        Ok(())
    }

    fn cancel_bindings(&mut self, ancestor: &QueryBindings) -> ExecResult<()> {
        let mut state = self.lock()?;
        if state.bindings.as_ref().is_some_and(|b| b.descends_from(ancestor)) {
            state.pending = false;
        }
        Ok(())
    }
}

struct Shared {
    input: Box<dyn QueryBindingsCursor>,
    buffer: VecDeque<QueryBindings>,
    /// Per reader, the number of buffered entries it has consumed.
    positions: Vec<usize>,
    exhausted: bool,
}

impl Shared {
    fn next_for(&mut self, reader: usize) -> ExecResult<Option<QueryBindings>> {
        let position = self.positions[reader];
        let result = if let Some(bindings) = self.buffer.get(position) {
            Some(bindings.clone())
        } else if self.exhausted {
            None
        } else {
            match self.input.next_bindings()? {
                Some(bindings) => {
                    self.buffer.push_back(bindings.clone());
                    Some(bindings)
                }
                None => {
                    self.exhausted = true;
                    None
                }
            }
        };
        if result.is_some() {
            self.positions[reader] += 1;
            self.trim();
        }
        Ok(result)
    }

    fn trim(&mut self) {
        let consumed = self.positions.iter().copied().min().unwrap_or(0);
        if consumed > 0 {
            self.buffer.drain(..consumed);
            for position in &mut self.positions {
                *position -= consumed;
            }
        }
    }

    fn discard_descendants(&mut self, ancestor: &QueryBindings) {
        let mut i = 0;
        while i < self.buffer.len() {
            if self.buffer[i].descends_from(ancestor) {
                self.buffer.remove(i);
                for position in &mut self.positions {
                    if *position > i {
                        *position -= 1;
                    }
                }
            } else {
                i += 1;
            }
        }
    }
}

/// Fans one bindings stream out to several readers.
///
/// [`fan_out`](Self::fan_out) returns an owning reader, which opens, closes
/// and cancels the underlying stream, plus further readers that see the
/// same sequence of scopes. That is how a binary operator hands identical
/// scopes to both of its inputs. An entry is kept until every reader has
/// consumed it.
pub struct MultipleQueryBindingsCursor {
    shared: Arc<Mutex<Shared>>,
    reader: usize,
}

impl MultipleQueryBindingsCursor {
    /// Wraps `input`, returning the owning reader and `readers` further
    /// readers that all see the same sequence of scopes.
    #[must_use]
    pub fn fan_out(input: Box<dyn QueryBindingsCursor>, readers: usize) -> (Self, Vec<Self>) {
        let shared = Self::shared(input, readers);
        let subs = (1..=readers).map(|reader| Self { shared: Arc::clone(&shared), reader }).collect();
        (Self { shared, reader: 0 }, subs)
    }

    /// Wraps `input`, returning the owning reader and two further readers.
    #[must_use]
    pub fn pair(input: Box<dyn QueryBindingsCursor>) -> (Self, Self, Self) {
        let shared = Self::shared(input, 2);
        let left = Self { shared: Arc::clone(&shared), reader: 1 };
        let right = Self { shared: Arc::clone(&shared), reader: 2 };
        (Self { shared, reader: 0 }, left, right)
    }

    fn shared(input: Box<dyn QueryBindingsCursor>, readers: usize) -> Arc<Mutex<Shared>> {
        Arc::new(Mutex::new(Shared {
            input,
            buffer: VecDeque::new(),
            positions: vec![0; readers + 1],
            exhausted: false,
        }))
    }

    const fn is_owner(&self) -> bool {
        self.reader == 0
    }

    fn lock(&self) -> ExecResult<MutexGuard<'_, Shared>> {
        self.shared.lock().map_err(|_| ExecError::LockPoisoned)
    }
}

impl QueryBindingsCursor for MultipleQueryBindingsCursor {
    fn open_bindings(&mut self) -> ExecResult<()> {
        if !self.is_owner() {
            return Ok(());
        }
        let mut shared = self.lock()?;
        shared.input.open_bindings()?;
        shared.buffer.clear();
        shared.positions.iter_mut().for_each(|p| *p = 0);
        shared.exhausted = false;
        Ok(())
    }

    fn next_bindings(&mut self) -> ExecResult<Option<QueryBindings>> {
        let reader = self.reader;
        self.lock()?.next_for(reader)
    }

    fn close_bindings(&mut self) -> ExecResult<()> {
        if !self.is_owner() {
            return Ok(());
        }
        let mut shared = self.lock()?;
        shared.buffer.clear();
        shared.positions.iter_mut().for_each(|p| *p = 0);
        shared.input.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecResult<()> {
        let mut shared = self.lock()?;
        shared.discard_descendants(bindings);
        if self.is_owner() {
            trace!(depth = bindings.depth(), "cancelling shared bindings");
            shared.input.cancel_bindings(bindings)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A bindings stream over a fixed list.
    struct ListBindings {
        items: Vec<QueryBindings>,
        next: usize,
    }

    impl QueryBindingsCursor for ListBindings {
        fn open_bindings(&mut self) -> ExecResult<()> {
            self.next = 0;
            Ok(())
        }

        fn next_bindings(&mut self) -> ExecResult<Option<QueryBindings>> {
            let item = self.items.get(self.next).cloned();
            self.next += 1;
            Ok(item)
        }

        fn close_bindings(&mut self) -> ExecResult<()> {
            Ok(())
        }

        fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecResult<()> {
            while self.items.get(self.next).is_some_and(|b| b.descends_from(bindings)) {
                self.next += 1;
            }
            Ok(())
        }
    }

    #[test]
    fn singleton_yields_once_per_open() {
        let root = QueryBindings::root();
        let mut cursor = SingletonQueryBindingsCursor::new(Some(root.clone()));
        cursor.open_bindings().unwrap();
        assert!(cursor.next_bindings().unwrap().unwrap().ptr_eq(&root));
        assert!(cursor.next_bindings().unwrap().is_none());

        let other = root.create_bindings();
        let handle = cursor.clone();
        handle.reset(other.clone()).unwrap();
        assert!(cursor.next_bindings().unwrap().unwrap().ptr_eq(&other));
    }

    #[test]
    fn singleton_cancel() {
        let root = QueryBindings::root();
        let child = root.create_bindings();
        let mut cursor = SingletonQueryBindingsCursor::new(Some(child));
        cursor.open_bindings().unwrap();
        cursor.cancel_bindings(&root).unwrap();
        assert!(cursor.next_bindings().unwrap().is_none());
    }

    #[test]
    fn multiple_readers_see_same_sequence() {
        let root = QueryBindings::root();
        let items: Vec<_> = (0..3).map(|_| root.create_bindings()).collect();
        let (mut owner, mut subs) =
            MultipleQueryBindingsCursor::fan_out(Box::new(ListBindings { items: items.clone(), next: 0 }), 2);
        let mut right = subs.pop().unwrap();
        let mut left = subs.pop().unwrap();

        owner.open_bindings().unwrap();
        for expected in &items {
            assert!(owner.next_bindings().unwrap().unwrap().ptr_eq(expected));
            assert!(left.next_bindings().unwrap().unwrap().ptr_eq(expected));
        }
        // right lags behind and still sees everything
        for expected in &items {
            assert!(right.next_bindings().unwrap().unwrap().ptr_eq(expected));
        }
        assert!(owner.next_bindings().unwrap().is_none());
        assert!(left.next_bindings().unwrap().is_none());
        assert!(right.next_bindings().unwrap().is_none());
    }

    #[test]
    fn multiple_cancel_drops_buffered_descendants() {
        let root = QueryBindings::root();
        let a = root.create_bindings();
        let a1 = a.create_bindings();
        let b = root.create_bindings();
        let (mut owner, mut subs) = MultipleQueryBindingsCursor::fan_out(
            Box::new(ListBindings { items: vec![a.clone(), a1, b.clone()], next: 0 }),
            1,
        );
        let mut sub = subs.pop().unwrap();

        owner.open_bindings().unwrap();
        assert!(owner.next_bindings().unwrap().unwrap().ptr_eq(&a));
        assert!(owner.next_bindings().unwrap().is_some());

        sub.cancel_bindings(&a).unwrap();
        owner.cancel_bindings(&a).unwrap();
        assert!(sub.next_bindings().unwrap().unwrap().ptr_eq(&b));
        assert!(owner.next_bindings().unwrap().unwrap().ptr_eq(&b));
    }
}
