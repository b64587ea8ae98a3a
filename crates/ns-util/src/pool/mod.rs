mod owned_pooled_item;
mod pooled_item;

pub use owned_pooled_item::OwnedPoolItem;
pub use pooled_item::PooledItem;

use parking_lot::Mutex;

/// Something a pooled value can be handed back to.
pub trait PoolReturn<T> {
    fn return_value(&self, value: T);
}

/// A bounded free-list of reusable values, built around a factory closure.
///
/// This is the generic shape the channel free-list (`ns::channel::pool`)
/// builds on: `take()` pops a recycled value or calls the factory, and
/// dropping the returned [`PooledItem`] pushes the value back unless an
/// optional return hook vetoes it (e.g. because the value grew too large to
/// be worth keeping around).
pub struct Pool<T> {
    factory: Box<dyn Fn() -> T + Send + Sync>,
    free: Mutex<Vec<T>>,
    max_idle: usize,
    take_hook: Option<Box<dyn Fn(T) -> T + Send + Sync>>,
    return_hook: Option<Box<dyn Fn(T) -> Option<T> + Send + Sync>>,
}

impl<T> Pool<T> {
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            free: Mutex::new(Vec::new()),
            max_idle: usize::MAX,
            take_hook: None,
            return_hook: None,
        }
    }

    /// Caps how many idle values are kept around; excess returns are dropped.
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Runs on every value as it leaves the pool (fresh or recycled).
    pub fn with_take_hook(mut self, hook: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.take_hook = Some(Box::new(hook));
        self
    }

    /// Runs on every value as it's returned; `None` drops it instead of
    /// keeping it idle.
    pub fn with_return_hook(
        mut self,
        hook: impl Fn(T) -> Option<T> + Send + Sync + 'static,
    ) -> Self {
        self.return_hook = Some(Box::new(hook));
        self
    }

    pub fn take(&self) -> PooledItem<'_, T> {
        let mut value = self.free.lock().pop().unwrap_or_else(|| (self.factory)());
        if let Some(hook) = &self.take_hook {
            value = hook(value);
        }
        PooledItem::new(value, self)
    }

    pub fn len_idle(&self) -> usize {
        self.free.lock().len()
    }
}

impl<T> PoolReturn<T> for Pool<T> {
    fn return_value(&self, value: T) {
        let value = match &self.return_hook {
            Some(hook) => match hook(value) {
                Some(v) => v,
                None => return,
            },
            None => value,
        };
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn recycles_returned_values() {
        static CREATED: AtomicUsize = AtomicUsize::new(0);
        let pool: Pool<Vec<u8>> = Pool::new(|| {
            CREATED.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        });

        {
            let mut item = pool.take();
            item.push(1);
        }
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);

        let item = pool.take();
        assert_eq!(item.len(), 1, "recycled value should have been reused");
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn respects_max_idle() {
        let pool: Pool<u32> = Pool::new(|| 0).with_max_idle(1);
        let a = pool.take();
        let b = pool.take();
        drop(a);
        drop(b);
        assert_eq!(pool.len_idle(), 1);
    }

    #[test]
    fn forget_prevents_return() {
        let pool: Pool<u32> = Pool::new(|| 0);
        let item = pool.take();
        let _ = item.forget();
        assert_eq!(pool.len_idle(), 0);
    }
}
