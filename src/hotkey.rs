//! Turning raw key events into controller signals.
//!
//! The tracker only remembers keys that belong to one of its chords. A chord
//! fires when the set of held keys is exactly that chord.

use std::collections::HashSet;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    StartCapture,
    StopCapture,
    Clear,
    Quit,
}

#[derive(Debug)]
pub struct ChordTracker<K> {
    talk: HashSet<K>,
    clear: HashSet<K>,
    quit: HashSet<K>,
    pressed: HashSet<K>,
    talking: bool,
}

impl<K: Copy + Eq + Hash> ChordTracker<K> {
    pub fn new(talk: HashSet<K>, clear: HashSet<K>, quit: HashSet<K>) -> Self {
        Self {
            talk,
            clear,
            quit,
            pressed: HashSet::new(),
            talking: false,
        }
    }

    fn is_tracked(&self, key: &K) -> bool {
        self.talk.contains(key) || self.clear.contains(key) || self.quit.contains(key)
    }

    fn held(&self, chord: &HashSet<K>) -> bool {
        !chord.is_empty() && *chord == self.pressed
    }

    pub fn press(&mut self, key: K) -> Option<Signal> {
        if !self.is_tracked(&key) || !self.pressed.insert(key) {
            // Untracked, or key repeat
            return None;
        }
        if self.held(&self.quit) {
            Some(Signal::Quit)
        } else if self.held(&self.clear) {
            Some(Signal::Clear)
        } else if self.held(&self.talk) && !self.talking {
            self.talking = true;
            Some(Signal::StartCapture)
        } else {
            None
        }
    }

    pub fn release(&mut self, key: K) -> Option<Signal> {
        self.pressed.remove(&key);
        if self.talking && self.pressed != self.talk {
            self.talking = false;
            return Some(Signal::StopCapture);
        }
        None
    }
}
