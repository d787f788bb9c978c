/// Receives byte counts while a UF2 stream is being written out.
pub trait ProgressReporter {
    fn start(&mut self, total_bytes: usize);
    fn advance(&mut self, bytes: usize);
    fn finish(&mut self);
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn start(&mut self, _total_bytes: usize) {}
    fn advance(&mut self, _bytes: usize) {}
    fn finish(&mut self) {}
}

impl<T: ProgressReporter + ?Sized> ProgressReporter for &mut T {
    fn start(&mut self, total_bytes: usize) {
        (**self).start(total_bytes)
    }

    fn advance(&mut self, bytes: usize) {
        (**self).advance(bytes)
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}
