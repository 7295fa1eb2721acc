//! Per-thread failure switches for exercising rollback paths in tests.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::errors::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    InsertRecord,
    UpdateRecord,
    FlushBeforeCommit,
}

thread_local! {
    static REGISTRY: RefCell<HashMap<FaultPoint, usize>> = RefCell::new(HashMap::new());
}

pub fn reset_faults() {
    REGISTRY.with(|registry| registry.borrow_mut().clear());
}

/// Makes the next `failures` hits of `point` on this thread fail.
pub fn configure_fault(point: FaultPoint, failures: usize) {
    REGISTRY.with(|registry| {
        let mut guard = registry.borrow_mut();
        if failures == 0 {
            guard.remove(&point);
        } else {
            guard.insert(point, failures);
        }
    });
}

pub(crate) fn check_fault(point: FaultPoint) -> Result<(), StoreError> {
    REGISTRY.with(|registry| {
        let mut guard = registry.borrow_mut();
        if let Some(remaining) = guard.get_mut(&point)
            && *remaining > 0
        {
            *remaining -= 1;
            if *remaining == 0 {
                guard.remove(&point);
            }
            return Err(StoreError::fault_injection(format!("{point:?}")));
        }
        Ok(())
    })
}
