use std::num::NonZero;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Unbounded,
    Bounded(NonZero<usize>),
}

impl<T> From<T> for Capacity
where
    T: Into<usize>,
{
    fn from(value: T) -> Self {
        match NonZero::new(value.into()) {
            Some(n) => Capacity::Bounded(n),
            None => Capacity::Unbounded,
        }
    }
}

impl Capacity {
    pub fn channel<T>(self) -> (flume::Sender<T>, flume::Receiver<T>) {
        match self {
            Capacity::Unbounded => flume::unbounded(),
            Capacity::Bounded(n) => flume::bounded(n.get()),
        }
    }
}
