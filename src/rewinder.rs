//! Bounded frame store backing the driver's rewind feature: a window of
//! decoded frames is kept so playback can run backwards over it and forwards
//! again without touching the decoder.

use anyhow::{Result, bail};

pub struct Rewinder {
    slots: Vec<Option<Vec<u8>>>,
}

impl Rewinder {
    #[must_use]
    pub fn new(frames: usize) -> Self {
        Self {
            slots: vec![None; frames],
        }
    }

    pub fn store(&mut self, slot: usize, frame: Vec<u8>) -> Result<()> {
        if slot >= self.slots.len() {
            bail!("rewind slot {slot} beyond capacity {}", self.slots.len());
        }
        self.slots[slot] = Some(frame);
        Ok(())
    }

    pub fn frame(&self, slot: usize) -> Result<&[u8]> {
        match self.slots.get(slot) {
            Some(Some(frame)) => Ok(frame),
            _ => bail!("rewind slot {slot} was never stored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn stores_and_replays_the_window() {
        let mut rewinder = Rewinder::new(3);
        for slot in 0..3 {
            rewinder.store(slot, vec![slot as u8; 4]).unwrap();
        }
        assert_eq!(rewinder.frame(2).unwrap(), &[2, 2, 2, 2]);
        assert_eq!(rewinder.frame(0).unwrap(), &[0, 0, 0, 0]);
        assert!(rewinder.frame(3).is_err());
        assert!(rewinder.store(3, vec![]).is_err());
    }

    #[test]
    fn unstored_slot_is_an_error() {
        let rewinder = Rewinder::new(2);
        assert!(rewinder.frame(0).is_err());
    }
}
