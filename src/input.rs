//! Keyboard/mouse vocabulary and the key → action table.
//!
//! Window backends translate their native events into [`InputEvent`]s; the
//! tracer maps pressed keys through [`KeyBindings`] to an [`Action`] and
//! applies held keys through [`HELD_KEYS`] once per frame.

use std::collections::HashMap;

/// Keys the tracer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Num1,
    Num2,
    Num3,
    Num4,
    Num5,
    Num7,
    Num8,
    Num9,
    W,
    A,
    S,
    D,
    R,
    F,
    H,
    I,
    K,
    L,
    M,
    X,
    Z,
    F1,
    F2,
    F3,
    F5,
    Space,
    Up,
    Down,
    Left,
    Right,
    Period,
    Comma,
    PageUp,
    PageDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// Discrete input event delivered by the presentation surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    KeyPressed(Key),
    MouseButton { button: MouseButton, pressed: bool, x: f32, y: f32 },
    CursorMoved { x: f32, y: f32 },
    /// Vertical scroll; sign is all that matters.
    Scroll(f32),
}

/// One-shot keypress actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Scene shortcut 1-5.
    QuickLoadScene(u8),
    OpenScenePicker,
    ToggleLightMode,
    ToggleSamplingMode,
    TogglePipeline,
    ResetCamera,
    LoadState,
    AimLightAtCamera,
    IncreaseBounces,
    DecreaseBounces,
    SaveState,
    Snapshot,
}

impl Action {
    /// Whether the action invalidates accumulated samples.
    ///
    /// Saving state and writing a snapshot only read the current frame.
    pub fn marks_dirty(self) -> bool {
        !matches!(self, Action::SaveState | Action::Snapshot)
    }
}

/// Key → action lookup.
#[derive(Debug, Clone)]
pub struct KeyBindings {
    map: HashMap<Key, Action>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        use Action::*;
        let map = HashMap::from([
            (Key::Num1, QuickLoadScene(1)),
            (Key::Num2, QuickLoadScene(2)),
            (Key::Num3, QuickLoadScene(3)),
            (Key::Num4, QuickLoadScene(4)),
            (Key::Num5, QuickLoadScene(5)),
            (Key::L, OpenScenePicker),
            (Key::H, ToggleLightMode),
            (Key::Num7, TogglePipeline),
            (Key::F1, ResetCamera),
            (Key::F3, LoadState),
            (Key::Space, AimLightAtCamera),
            (Key::I, IncreaseBounces),
            (Key::K, DecreaseBounces),
            (Key::M, ToggleSamplingMode),
            (Key::F2, SaveState),
            (Key::F5, Snapshot),
        ]);
        Self { map }
    }
}

impl KeyBindings {
    pub fn action(&self, key: Key) -> Option<Action> {
        self.map.get(&key).copied()
    }

    pub fn bind(&mut self, key: Key, action: Action) {
        self.map.insert(key, action);
    }
}

/// Continuous adjustments applied every frame a key is held.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Motion {
    /// Translate along forward/right/up, in units of the rig step.
    Move { forward: f32, right: f32, up: f32 },
    /// Degrees added to (yaw, pitch).
    Rotate { yaw: f32, pitch: f32 },
    Fov(f32),
    LightSize(f32),
    LightPower(f32),
    EnvStrength(f32),
}

/// Held-key table.
pub const HELD_KEYS: &[(Key, Motion)] = &[
    (Key::W, Motion::Move { forward: 1.0, right: 0.0, up: 0.0 }),
    (Key::S, Motion::Move { forward: -1.0, right: 0.0, up: 0.0 }),
    (Key::A, Motion::Move { forward: 0.0, right: -1.0, up: 0.0 }),
    (Key::D, Motion::Move { forward: 0.0, right: 1.0, up: 0.0 }),
    (Key::R, Motion::Move { forward: 0.0, right: 0.0, up: 1.0 }),
    (Key::F, Motion::Move { forward: 0.0, right: 0.0, up: -1.0 }),
    (Key::Up, Motion::Rotate { yaw: 0.0, pitch: -1.0 }),
    (Key::Down, Motion::Rotate { yaw: 0.0, pitch: 1.0 }),
    (Key::Left, Motion::Rotate { yaw: -1.0, pitch: 0.0 }),
    (Key::Right, Motion::Rotate { yaw: 1.0, pitch: 0.0 }),
    (Key::Period, Motion::Fov(1.0)),
    (Key::Comma, Motion::Fov(-1.0)),
    (Key::Num8, Motion::LightSize(1.0 / 1.1)),
    (Key::Num9, Motion::LightSize(1.1)),
    (Key::PageDown, Motion::LightPower(1.0 / 1.05)),
    (Key::PageUp, Motion::LightPower(1.05)),
    (Key::Z, Motion::EnvStrength(1.0 / 1.05)),
    (Key::X, Motion::EnvStrength(1.05)),
];

/// Field-of-view limits in degrees.
pub const FOV_RANGE: (f32, f32) = (5.0, 175.0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passive_actions() {
        assert!(!Action::SaveState.marks_dirty());
        assert!(!Action::Snapshot.marks_dirty());
        for a in [
            Action::QuickLoadScene(3),
            Action::OpenScenePicker,
            Action::ToggleLightMode,
            Action::ToggleSamplingMode,
            Action::TogglePipeline,
            Action::ResetCamera,
            Action::LoadState,
            Action::AimLightAtCamera,
            Action::IncreaseBounces,
            Action::DecreaseBounces,
        ] {
            assert!(a.marks_dirty(), "{a:?}");
        }
    }

    #[test]
    fn test_default_bindings() {
        let b = KeyBindings::default();
        assert_eq!(b.action(Key::Num7), Some(Action::TogglePipeline));
        assert_eq!(b.action(Key::F5), Some(Action::Snapshot));
        assert_eq!(b.action(Key::Num4), Some(Action::QuickLoadScene(4)));
        // Held keys are not one-shot actions.
        assert_eq!(b.action(Key::W), None);
    }

    #[test]
    fn test_held_keys_disjoint_from_bindings() {
        let b = KeyBindings::default();
        for (key, _) in HELD_KEYS {
            assert!(b.action(*key).is_none(), "{key:?} bound twice");
        }
    }
}
