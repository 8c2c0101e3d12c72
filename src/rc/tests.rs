//! Tests for strong/weak handles and the destruction state machine

use super::*;
use crate::allocator::Lifecycle;
use crate::error::HeapError;
use crate::object::{create, create_via, Managed};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts hook invocations shared with the test body
#[derive(Default)]
struct Probe {
    finalized: AtomicUsize,
    resurrected: AtomicUsize,
    dropped: AtomicUsize,
}

impl Probe {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn finalized(&self) -> usize {
        self.finalized.load(Ordering::SeqCst)
    }

    fn resurrected(&self) -> usize {
        self.resurrected.load(Ordering::SeqCst)
    }

    fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

struct Tracked {
    value: u32,
    probe: Arc<Probe>,
}

impl Tracked {
    fn new(value: u32, probe: &Arc<Probe>) -> Self {
        Self {
            value,
            probe: Arc::clone(probe),
        }
    }
}

impl Managed for Tracked {
    fn finalize(&self, this: &Strong<Self>) {
        assert_eq!(this.state(), Some(Lifecycle::Finalizing));
        self.probe.finalized.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.probe.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Resurrects itself from `finalize` while it has lives left
struct Phoenix {
    lives: AtomicUsize,
    stash: Arc<Mutex<Vec<Strong<Phoenix>>>>,
    probe: Arc<Probe>,
}

impl Managed for Phoenix {
    fn finalize(&self, this: &Strong<Self>) {
        self.probe.finalized.fetch_add(1, Ordering::SeqCst);
        if self.lives.load(Ordering::SeqCst) > 0 {
            self.lives.fetch_sub(1, Ordering::SeqCst);
            self.stash.lock().push(this.clone());
        }
    }

    fn resurrect(&self) {
        self.probe.resurrected.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for Phoenix {
    fn drop(&mut self) {
        self.probe.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

fn pop(stash: &Mutex<Vec<Strong<Phoenix>>>) -> Option<Strong<Phoenix>> {
    stash.lock().pop()
}

trait Shape: Send + Sync {
    fn area(&self) -> f64;
}

struct Square(f64);

impl Managed for Square {}

impl Shape for Square {
    fn area(&self) -> f64 {
        self.0 * self.0
    }
}

#[cfg(test)]
mod strong_tests {
    use super::*;

    #[test]
    fn test_null_handle() {
        let null: Strong<Tracked> = Strong::null();
        assert!(null.is_null());
        assert_eq!(null.strong_count(), 0);
        assert_eq!(null.addr(), 0);
        assert_eq!(null.state(), None);
        assert!(null.as_ref().is_none());
        assert_eq!(null.describe(), "null");
        assert_eq!(Strong::<Tracked>::default(), null);
    }

    #[test]
    fn test_null_get_names_declared_type() {
        let null: Strong<Tracked> = Strong::null();
        match null.get() {
            Err(HeapError::NullDereference { type_name }) => assert!(type_name.ends_with("Tracked")),
            other => panic!("unexpected {:?}", other.map(|t| t.value)),
        }
    }

    #[test]
    #[should_panic(expected = "is null so it cannot be dereferenced")]
    fn test_null_deref_panics() {
        let null: Strong<Tracked> = Strong::null();
        let value = null.value;
        assert_eq!(value, 0);
    }

    #[test]
    fn test_clone_and_drop_balance() {
        let probe = Probe::new();
        let first = create(Tracked::new(7, &probe)).unwrap();
        assert_eq!(first.strong_count(), 1);
        assert_eq!(first.state(), Some(Lifecycle::Live));

        let second = first.clone();
        let third = second.clone();
        assert_eq!(first.strong_count(), 3);
        assert_eq!(third.value, 7);

        drop(second);
        drop(third);
        assert_eq!(first.strong_count(), 1);
        assert_eq!(probe.finalized(), 0);

        drop(first);
        assert_eq!(probe.finalized(), 1);
        assert_eq!(probe.dropped(), 1);
    }

    #[test]
    fn test_take_moves_ownership() {
        let probe = Probe::new();
        let mut source = create(Tracked::new(1, &probe)).unwrap();
        let moved = source.take();

        assert!(source.is_null());
        assert_eq!(moved.strong_count(), 1);
        drop(source);
        assert_eq!(probe.dropped(), 0);
        drop(moved);
        assert_eq!(probe.dropped(), 1);
    }

    #[test]
    fn test_assign_same_target_keeps_object() {
        let probe = Probe::new();
        let mut handle = create(Tracked::new(1, &probe)).unwrap();
        let alias = handle.clone();

        handle.assign(&alias);
        assert_eq!(handle.strong_count(), 2);

        let copy = handle.clone();
        handle.set(copy);
        assert_eq!(handle.strong_count(), 2);
        assert_eq!(probe.finalized(), 0);
    }

    #[test]
    fn test_assign_releases_previous() {
        let probe = Probe::new();
        let mut handle = create(Tracked::new(1, &probe)).unwrap();
        let other = create(Tracked::new(2, &probe)).unwrap();

        handle.assign(&other);
        assert_eq!(probe.dropped(), 1);
        assert_eq!(handle.value, 2);
        assert_eq!(other.strong_count(), 2);

        handle.clear();
        assert!(handle.is_null());
        assert_eq!(other.strong_count(), 1);
    }

    #[test]
    fn test_identity_comparison() {
        let probe = Probe::new();
        let a = create(Tracked::new(1, &probe)).unwrap();
        let b = create(Tracked::new(1, &probe)).unwrap();

        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert!(a.ptr_eq(&a.clone()));

        let set: HashSet<_> = [a.clone(), a.clone(), b.clone()].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(a.cmp(&b), a.addr().cmp(&b.addr()));
    }

    #[test]
    fn test_describe() {
        let probe = Probe::new();
        let handle = create(Tracked::new(1, &probe)).unwrap();
        let text = handle.describe();

        assert!(text.contains("Tracked@0x"), "{}", text);
        assert_eq!(format!("{:?}", handle), format!("Strong({})", text));
    }

    #[test]
    fn test_get_mut_requires_sole_owner() {
        let probe = Probe::new();
        let mut handle = create(Tracked::new(1, &probe)).unwrap();
        handle.get_mut().unwrap().value = 5;
        assert_eq!(handle.value, 5);

        let alias = handle.clone();
        assert!(handle.get_mut().is_none());
        drop(alias);

        let weak = Weak::from_strong(&handle).unwrap();
        assert!(handle.get_mut().is_none());
        drop(weak);
        assert!(handle.get_mut().is_some());
    }

    #[test]
    fn test_upcast_and_downcast() {
        let square = create(Square(3.0)).unwrap();
        let shape: Strong<dyn Shape> = square.clone().upcast(|s| s as &dyn Shape);

        assert_eq!(shape.area(), 9.0);
        assert!(shape.ptr_eq(&square));
        assert_eq!(square.strong_count(), 2);

        let back = shape.downcast::<Square>();
        assert!(back.ptr_eq(&square));
        assert_eq!(square.strong_count(), 3);

        let wrong = shape.downcast::<Tracked>();
        assert!(wrong.is_null());
        assert_eq!(square.strong_count(), 3);
        assert!(shape.describe().contains("Square@"));
    }

    #[test]
    fn test_from_object() {
        let probe = Probe::new();
        let handle = create(Tracked::new(4, &probe)).unwrap();
        let again = unsafe { Strong::from_object(&*handle) };

        assert!(again.ptr_eq(&handle));
        assert_eq!(handle.strong_count(), 2);
    }
}

#[cfg(test)]
mod weak_tests {
    use super::*;

    #[test]
    fn test_weak_does_not_own() {
        let probe = Probe::new();
        let strong = create(Tracked::new(1, &probe)).unwrap();
        let weak = Weak::from_strong(&strong).unwrap();

        assert_eq!(strong.strong_count(), 1);
        assert_eq!(strong.weak_count(), 1);
        assert!(weak.points_to(&strong));
        assert!(!weak.is_expired());
        assert_eq!(weak.get().value, 1);

        drop(strong);
        assert_eq!(probe.dropped(), 1);
        assert!(weak.is_expired());
        assert!(weak.get().is_null());
        assert_eq!(weak.addr(), 0);
    }

    #[test]
    fn test_get_checked_after_destruction() {
        let probe = Probe::new();
        let strong = create(Tracked::new(1, &probe)).unwrap();
        let weak = Weak::from_strong(&strong).unwrap();
        drop(strong);

        match weak.get_checked() {
            Err(HeapError::AbsentTarget { type_name }) => assert!(type_name.ends_with("Tracked")),
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("target should be gone"),
        }
    }

    #[test]
    fn test_null_weak() {
        let weak: Weak<Tracked> = Weak::new();
        assert!(weak.is_expired());
        assert!(weak.get().is_null());
        assert_eq!(weak, Weak::default());

        let from_null = Weak::from_strong(&Strong::<Tracked>::null()).unwrap();
        assert!(from_null.get().is_null());
    }

    #[test]
    fn test_clone_joins_ring() {
        let probe = Probe::new();
        let strong = create(Tracked::new(1, &probe)).unwrap();
        let weak = Weak::from_strong(&strong).unwrap();
        let copy = weak.clone();

        assert_eq!(strong.weak_count(), 2);
        assert_eq!(weak, copy);

        drop(copy);
        assert_eq!(strong.weak_count(), 1);
    }

    #[test]
    fn test_reassignment_moves_between_rings() {
        let probe = Probe::new();
        let first = create(Tracked::new(1, &probe)).unwrap();
        let second = create(Tracked::new(2, &probe)).unwrap();

        let mut weak = Weak::from_strong(&first).unwrap();
        weak.assign(&second).unwrap();
        assert_eq!(first.weak_count(), 0);
        assert_eq!(second.weak_count(), 1);
        assert_eq!(weak.get().value, 2);

        let mut other = Weak::new();
        other.assign_weak(&weak);
        assert_eq!(second.weak_count(), 2);
        assert!(other.points_to(&second));

        other.clear();
        assert_eq!(second.weak_count(), 1);
        assert!(other.get().is_null());

        weak.assign(&Strong::null()).unwrap();
        assert_eq!(second.weak_count(), 0);
    }

    #[test]
    fn test_invalidation_clears_every_weak() {
        let probe = Probe::new();
        let strong = create(Tracked::new(1, &probe)).unwrap();
        let weaks: Vec<_> = (0..5).map(|_| Weak::from_strong(&strong).unwrap()).collect();
        assert_eq!(strong.weak_count(), 5);

        drop(strong);
        assert!(weaks.iter().all(|w| w.get().is_null()));

        // Clones of invalidated weaks start out null
        let copy = weaks[0].clone();
        assert!(copy.get().is_null());
    }

    #[test]
    fn test_weak_to_dropping_object_rejected() {
        struct Observer {
            outcome: Arc<Mutex<Option<Result<(), HeapError>>>>,
        }

        impl Managed for Observer {}

        impl Drop for Observer {
            fn drop(&mut self) {
                // Destruction has committed: the count is already zero
                let weak = unsafe { Weak::from_object(&*self) };
                *self.outcome.lock() = Some(weak.map(drop));
            }
        }

        let outcome = Arc::new(Mutex::new(None));
        drop(
            create(Observer {
                outcome: Arc::clone(&outcome),
            })
            .unwrap(),
        );

        match outcome.lock().take() {
            Some(Err(HeapError::InvalidWeakTarget { type_name })) => assert!(type_name.ends_with("Observer")),
            Some(Err(other)) => panic!("unexpected error {}", other),
            Some(Ok(())) => panic!("weak reference taken while dropping"),
            None => panic!("drop did not run"),
        };
    }

    #[test]
    fn test_assign_weak_from_committed_target_is_expired() {
        let probe = Probe::new();
        let strong = create(Tracked::new(1, &probe)).unwrap();
        let source = Weak::from_strong(&strong).unwrap();
        let header = strong.header().unwrap();

        // Hold the object at a committed zero count while copying
        assert!(header.strong.transfer(1, 0));
        let mut copy = Weak::new();
        copy.assign_weak(&source);
        let cloned = source.clone();
        assert!(header.strong.transfer(0, 1));

        assert!(copy.get().is_null());
        assert!(cloned.get().is_null());
        assert_eq!(copy.addr(), 0);
        assert_eq!(strong.weak_count(), 1);

        drop(strong);
        assert_eq!(probe.dropped(), 1);
        assert!(source.get().is_null());
    }

    #[test]
    fn test_display() {
        struct Label(&'static str);
        impl Managed for Label {}
        impl std::fmt::Display for Label {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.0)
            }
        }

        let strong = create(Label("hello")).unwrap();
        let weak = Weak::from_strong(&strong).unwrap();
        assert_eq!(strong.to_string(), "hello");
        assert_eq!(weak.to_string(), "Weak(hello)");

        drop(strong);
        assert_eq!(weak.to_string(), "Weak(null)");
        assert_eq!(Strong::<Label>::null().to_string(), "null");
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    fn phoenix(lives: usize, probe: &Arc<Probe>) -> (Strong<Phoenix>, Arc<Mutex<Vec<Strong<Phoenix>>>>) {
        let stash = Arc::new(Mutex::new(Vec::new()));
        let bird = create(Phoenix {
            lives: AtomicUsize::new(lives),
            stash: Arc::clone(&stash),
            probe: Arc::clone(probe),
        })
        .unwrap();
        (bird, stash)
    }

    #[test]
    fn test_unobserved_destruction_skips_registry() {
        let probe = Probe::new();
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let registry = ring::lock_registry();
        let worker = {
            let probe = Arc::clone(&probe);
            std::thread::spawn(move || {
                drop(create(Tracked::new(1, &probe)).unwrap());
                done_tx.send(()).unwrap();
            })
        };
        let finished = done_rx.recv_timeout(std::time::Duration::from_secs(5));
        drop(registry);
        worker.join().unwrap();

        assert!(finished.is_ok(), "destruction without weak references waited on the registry lock");
        assert_eq!(probe.dropped(), 1);
    }

    #[test]
    fn test_resurrection_bound() {
        let probe = Probe::new();
        let (bird, stash) = phoenix(3, &probe);
        let weak = Weak::from_strong(&bird).unwrap();

        drop(bird);
        for round in 1..=3 {
            assert_eq!(probe.finalized(), round);
            assert_eq!(probe.resurrected(), round);
            assert_eq!(probe.dropped(), 0);

            let revived = pop(&stash).unwrap();
            assert_eq!(revived.strong_count(), 1);
            assert_eq!(revived.state(), Some(Lifecycle::Live));
            assert!(weak.points_to(&revived));
            drop(revived);
        }

        assert_eq!(probe.finalized(), 4);
        assert_eq!(probe.resurrected(), 3);
        assert_eq!(probe.dropped(), 1);
        assert!(weak.get().is_null());
    }

    #[test]
    fn test_weak_upgrade_in_finalize_resurrects() {
        struct Watched {
            observer: Arc<Mutex<Weak<Watched>>>,
            stash: Arc<Mutex<Vec<Strong<Watched>>>>,
            armed: AtomicUsize,
        }

        impl Managed for Watched {
            fn finalize(&self, _this: &Strong<Self>) {
                if self.armed.swap(0, Ordering::SeqCst) == 1 {
                    let again = self.observer.lock().get();
                    assert!(!again.is_null());
                    self.stash.lock().push(again);
                }
            }
        }

        let observer = Arc::new(Mutex::new(Weak::new()));
        let stash = Arc::new(Mutex::new(Vec::new()));
        let watched = create(Watched {
            observer: Arc::clone(&observer),
            stash: Arc::clone(&stash),
            armed: AtomicUsize::new(1),
        })
        .unwrap();
        observer.lock().assign(&watched).unwrap();

        drop(watched);
        let revived = stash.lock().pop().unwrap();
        assert_eq!(revived.state(), Some(Lifecycle::Live));

        drop(revived);
        assert!(observer.lock().get().is_null());
    }

    #[test]
    fn test_initialize_escape() {
        struct Registered {
            registry: Arc<Mutex<Vec<Strong<Registered>>>>,
            fail: bool,
        }

        impl Managed for Registered {
            fn initialize(&self, this: &Strong<Self>) -> crate::Result<()> {
                assert_eq!(this.state(), Some(Lifecycle::Live));
                self.registry.lock().push(this.clone());
                if self.fail {
                    return Err(HeapError::initialization::<Self>("refused"));
                }
                Ok(())
            }
        }

        let registry = Arc::new(Mutex::new(Vec::new()));
        let ok = create(Registered {
            registry: Arc::clone(&registry),
            fail: false,
        })
        .unwrap();
        assert_eq!(ok.strong_count(), 2);

        let err = create(Registered {
            registry: Arc::clone(&registry),
            fail: true,
        })
        .unwrap_err();
        assert!(matches!(err, HeapError::Initialization { .. }));

        // The escaped reference keeps the failed object alive
        let survivor = registry.lock().pop().unwrap();
        assert_eq!(survivor.strong_count(), 1);
        assert!(survivor.fail);
        registry.lock().clear();
    }

    #[test]
    fn test_initialize_failure_destroys_unescaped() {
        struct Refuses(Arc<Probe>);

        impl Managed for Refuses {
            fn initialize(&self, _this: &Strong<Self>) -> crate::Result<()> {
                Err(HeapError::initialization::<Self>("no"))
            }

            fn finalize(&self, _this: &Strong<Self>) {
                self.0.finalized.fetch_add(1, Ordering::SeqCst);
            }
        }

        impl Drop for Refuses {
            fn drop(&mut self) {
                self.0.dropped.fetch_add(1, Ordering::SeqCst);
            }
        }

        let probe = Probe::new();
        assert!(create(Refuses(Arc::clone(&probe))).is_err());
        assert_eq!(probe.finalized(), 1);
        assert_eq!(probe.dropped(), 1);
    }

    #[test]
    fn test_constructor_failure_never_exports() {
        let probe = Probe::new();
        let before = crate::allocator::stats();

        let result = create_via::<Tracked, _>(|| Err(HeapError::invalid_argument("bad input")));
        assert!(matches!(result, Err(HeapError::InvalidArgument(_))));
        assert_eq!(probe.finalized(), 0);

        let after = crate::allocator::stats();
        assert!(after.deallocations > before.deallocations);
    }

    #[test]
    fn test_constructor_panic_frees_storage() {
        let before = crate::allocator::stats();
        let result = std::panic::catch_unwind(|| {
            let _ = create_via::<Square, _>(|| panic!("constructor exploded"));
        });
        assert!(result.is_err());
        assert!(crate::allocator::stats().deallocations > before.deallocations);
    }
}
