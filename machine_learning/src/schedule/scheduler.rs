/// Decides the learning rate as a function of how many steps have been taken.
pub trait LrScheduler: Send {
    /// Advances the schedule by one step.
    fn step(&mut self) {
        let steps = self.steps();
        self.set_steps(steps + 1);
    }

    /// The learning rate for the current step.
    fn lr(&self) -> f32;

    /// The amount of steps taken so far.
    fn steps(&self) -> u64;

    /// Jumps to an arbitrary position of the schedule, used when resuming.
    fn set_steps(&mut self, steps: u64);
}

impl<T: LrScheduler + ?Sized> LrScheduler for Box<T> {
    fn step(&mut self) {
        (**self).step()
    }

    fn lr(&self) -> f32 {
        (**self).lr()
    }

    fn steps(&self) -> u64 {
        (**self).steps()
    }

    fn set_steps(&mut self, steps: u64) {
        (**self).set_steps(steps)
    }
}
