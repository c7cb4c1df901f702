use std::time::{Duration, Instant};

// One-shot events ordered by deadline. The owner re-arms recurring events
// as they fire; the timer itself never looks at a clock.
#[derive(Debug)]
pub struct EventTimer<T> {
    entries: Vec<(Instant, T)>,
}

impl<T> EventTimer<T> {

    pub fn new() -> EventTimer<T> {
        EventTimer { entries: Vec::new() }
    }

    pub fn schedule(&mut self, now: Instant, delay: Duration, event: T) {
        self.entries.push((now + delay, event));
    }

    // Remove and return every due event, earliest deadline first.
    pub fn step(&mut self, now: Instant) -> Vec<T> {
        let mut due: Vec<(Instant, T)> = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].0 <= now {
                due.push(self.entries.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|(at, _)| *at);
        due.into_iter().map(|(_, event)| event).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
