//! Handles and storage for synchronization objects.
//!
//! Mutexes, semaphores and condition variables share one fixed-size table.
//! Handles carry the slot generation so a handle to a destroyed object is
//! rejected instead of aliasing whatever reused the slot.

use core::fmt;

use kestrel_core::fatal::{self, FatalError};
use kestrel_core::{KResult, KernelError};

use crate::condvar::CondVarState;
use crate::mutex::MutexState;
use crate::semaphore::SemaphoreState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObjectId {
    index: u16,
    generation: u16,
}

impl ObjectId {
    pub const fn index(self) -> u16 {
        self.index
    }

    pub const fn generation(self) -> u16 {
        self.generation
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O{}.{}", self.index, self.generation)
    }
}

macro_rules! object_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub struct $name(ObjectId);

        impl $name {
            pub const fn object(self) -> ObjectId {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

object_handle!(
    /// Handle to a mutex
    MutexId
);
object_handle!(
    /// Handle to a counting semaphore
    SemaphoreId
);
object_handle!(
    /// Handle to a condition variable
    CondVarId
);

#[derive(Debug)]
pub(crate) enum SyncObject {
    Mutex(MutexState),
    Semaphore(SemaphoreState),
    CondVar(CondVarState),
}

#[derive(Debug, Default)]
struct Slot {
    generation: u16,
    object: Option<SyncObject>,
}

#[derive(Debug)]
pub(crate) struct ObjectTable<const N: usize> {
    slots: [Slot; N],
}

impl<const N: usize> ObjectTable<N> {
    pub(crate) fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot::default()),
        }
    }

    fn insert(&mut self, object: SyncObject) -> KResult<ObjectId> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.object.is_none())
            .ok_or(KernelError::ResourceExhausted)?;

        slot.object = Some(object);
        Ok(ObjectId {
            index: index as u16,
            generation: slot.generation,
        })
    }

    fn remove(&mut self, id: ObjectId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.object.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
    }

    fn get(&self, id: ObjectId) -> KResult<&SyncObject> {
        match self.slots.get(id.index as usize) {
            Some(slot) if slot.generation == id.generation => {
                slot.object.as_ref().ok_or(KernelError::InvalidState)
            }
            _ => Err(KernelError::InvalidState),
        }
    }

    fn get_mut(&mut self, id: ObjectId) -> KResult<&mut SyncObject> {
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation => {
                slot.object.as_mut().ok_or(KernelError::InvalidState)
            }
            _ => Err(KernelError::InvalidState),
        }
    }

    pub(crate) fn insert_mutex(&mut self, state: MutexState) -> KResult<MutexId> {
        self.insert(SyncObject::Mutex(state)).map(MutexId)
    }

    pub(crate) fn insert_semaphore(&mut self, state: SemaphoreState) -> KResult<SemaphoreId> {
        self.insert(SyncObject::Semaphore(state)).map(SemaphoreId)
    }

    pub(crate) fn insert_condvar(&mut self, state: CondVarState) -> KResult<CondVarId> {
        self.insert(SyncObject::CondVar(state)).map(CondVarId)
    }

    pub(crate) fn remove_mutex(&mut self, id: MutexId) {
        self.remove(id.0);
    }

    pub(crate) fn remove_semaphore(&mut self, id: SemaphoreId) {
        self.remove(id.0);
    }

    pub(crate) fn remove_condvar(&mut self, id: CondVarId) {
        self.remove(id.0);
    }

    pub(crate) fn mutex(&self, id: MutexId) -> KResult<&MutexState> {
        match self.get(id.0)? {
            SyncObject::Mutex(state) => Ok(state),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    pub(crate) fn mutex_mut(&mut self, id: MutexId) -> KResult<&mut MutexState> {
        match self.get_mut(id.0)? {
            SyncObject::Mutex(state) => Ok(state),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    pub(crate) fn semaphore(&self, id: SemaphoreId) -> KResult<&SemaphoreState> {
        match self.get(id.0)? {
            SyncObject::Semaphore(state) => Ok(state),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    pub(crate) fn semaphore_mut(&mut self, id: SemaphoreId) -> KResult<&mut SemaphoreState> {
        match self.get_mut(id.0)? {
            SyncObject::Semaphore(state) => Ok(state),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    pub(crate) fn condvar(&self, id: CondVarId) -> KResult<&CondVarState> {
        match self.get(id.0)? {
            SyncObject::CondVar(state) => Ok(state),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    pub(crate) fn condvar_mut(&mut self, id: CondVarId) -> KResult<&mut CondVarState> {
        match self.get_mut(id.0)? {
            SyncObject::CondVar(state) => Ok(state),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// Mutex referenced from inside the scheduler (owned lists, blocked
    /// threads). A dangling reference here means the records are corrupt.
    pub(crate) fn held_mutex(&self, id: MutexId) -> &MutexState {
        match self.mutex(id) {
            Ok(state) => state,
            Err(_) => fatal::raise(FatalError::OwnershipCorrupted { object: id.0.index }),
        }
    }

    pub(crate) fn held_mutex_mut(&mut self, id: MutexId) -> &mut MutexState {
        match self.mutex_mut(id) {
            Ok(state) => state,
            Err(_) => fatal::raise(FatalError::OwnershipCorrupted { object: id.0.index }),
        }
    }

    #[cfg(test)]
    pub(crate) fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.object.is_some()).count()
    }
}
