//! Collaborators the orchestrator drives but does not own: the window it
//! presents into and the file dialog it opens for scene selection.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use crate::backend::PresentTarget;
use crate::input::{InputEvent, Key};
use crate::util::Result;

/// Window/presentation side of the frame loop.
pub trait PresentationSurface {
    /// Framebuffer size in device pixels, before render scaling.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Discrete events since the last poll.
    fn poll_events(&mut self) -> Vec<InputEvent>;

    /// Whether `key` is currently held down.
    fn is_key_down(&self, key: Key) -> bool;

    /// Block until the previously presented frame has retired.
    fn wait_for_present(&mut self);

    /// Draw `target` to the screen.
    fn present(&mut self, target: PresentTarget) -> Result<()>;
}

/// Interactive scene selection. Returns `None` when the user cancels.
pub trait ScenePicker {
    fn pick_scene(&mut self) -> Option<PathBuf>;
}

/// Picker that always cancels; used headless.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPicker;

impl ScenePicker for NoPicker {
    fn pick_scene(&mut self) -> Option<PathBuf> {
        None
    }
}

/// Picker returning queued answers in order, then cancelling.
#[derive(Debug, Default, Clone)]
pub struct ScriptedPicker(pub VecDeque<PathBuf>);

impl ScenePicker for ScriptedPicker {
    fn pick_scene(&mut self) -> Option<PathBuf> {
        self.0.pop_front()
    }
}

/// Offscreen surface with scripted input.
#[derive(Debug, Clone)]
pub struct HeadlessSurface {
    pub size: (u32, u32),
    pub events: VecDeque<InputEvent>,
    pub held: HashSet<Key>,
    /// Every presented target, in order.
    pub presented: Vec<PresentTarget>,
}

impl HeadlessSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            events: VecDeque::new(),
            held: HashSet::new(),
            presented: Vec::new(),
        }
    }

    pub fn push(&mut self, event: InputEvent) {
        self.events.push_back(event);
    }

    pub fn press(&mut self, key: Key) {
        self.push(InputEvent::KeyPressed(key));
    }

    pub fn hold(&mut self, key: Key, down: bool) {
        if down {
            self.held.insert(key);
        } else {
            self.held.remove(&key);
        }
    }
}

impl PresentationSurface for HeadlessSurface {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.size
    }

    fn poll_events(&mut self) -> Vec<InputEvent> {
        self.events.drain(..).collect()
    }

    fn is_key_down(&self, key: Key) -> bool {
        self.held.contains(&key)
    }

    fn wait_for_present(&mut self) {}

    fn present(&mut self, target: PresentTarget) -> Result<()> {
        self.presented.push(target);
        Ok(())
    }
}
