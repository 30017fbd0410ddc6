use std::sync::Mutex;
use tracing::{debug, trace};
use crate::buffers::frame_buff::FrameBuff;

/// A fixed number of equally sized frames, allocated up front. This is what a link hands out:
///  when all frames are in use, there is no fallback allocation.
pub struct FramePool {
    frame_size: usize,
    num_frames: usize,
    frames: Mutex<Vec<FrameBuff>>,
}

impl FramePool {
    pub fn new(frame_size: usize, num_frames: usize) -> Self {
        let frames = (0..num_frames)
            .map(|_| FrameBuff::new(frame_size))
            .collect();

        FramePool {
            frame_size,
            num_frames,
            frames: Mutex::new(frames),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn num_free(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn get_from_pool(&self) -> Option<FrameBuff> {
        let mut frames = self.frames.lock().unwrap();
        match frames.pop() {
            Some(frame) => {
                trace!("handing out frame from pool, {} left", frames.len());
                Some(frame)
            }
            None => {
                debug!("all {} frames are in use", self.num_frames);
                None
            }
        }
    }

    pub fn return_to_pool(&self, mut frame: FrameBuff) {
        assert_eq!(frame.capacity(), self.frame_size,
                   "returned frame does not have the regular capacity of {} bytes, it was probably not taken from this pool"
                   , self.frame_size);

        frame.clear();

        let mut frames = self.frames.lock().unwrap();
        assert!(frames.len() < self.num_frames, "more frames returned than were handed out");
        trace!("returning frame to pool");
        frames.push(frame);
    }
}
