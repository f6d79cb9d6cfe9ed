//! egui side of the presentation contract.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::backend::PresentTarget;
use crate::input::{InputEvent, Key, MouseButton};
use crate::tracer::{PresentationSurface, ScenePicker};
use crate::Result;

/// One frame's worth of window input, captured from the egui context.
///
/// egui composites after `update` returns, so presenting only records which
/// target to draw; the app paints it once the tracer is done.
pub struct EguiSurface {
    size: (u32, u32),
    events: Vec<InputEvent>,
    held: HashSet<Key>,
    pub presented: Option<PresentTarget>,
}

impl EguiSurface {
    /// Capture input for a viewport `size` pixels large.
    pub fn capture(ctx: &egui::Context, size: (u32, u32)) -> Self {
        let ppp = ctx.pixels_per_point();
        let (events, held) = ctx.input(|i| {
            let events = i.events.iter().filter_map(|e| convert_event(e, ppp)).collect();
            let held = i.keys_down.iter().filter_map(|&k| convert_key(k)).collect();
            (events, held)
        });
        Self {
            size,
            events,
            held,
            presented: None,
        }
    }
}

impl PresentationSurface for EguiSurface {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.size
    }

    fn poll_events(&mut self) -> Vec<InputEvent> {
        std::mem::take(&mut self.events)
    }

    fn is_key_down(&self, key: Key) -> bool {
        self.held.contains(&key)
    }

    // eframe owns the swapchain.
    fn wait_for_present(&mut self) {}

    fn present(&mut self, target: PresentTarget) -> Result<()> {
        self.presented = Some(target);
        Ok(())
    }
}

fn convert_event(event: &egui::Event, ppp: f32) -> Option<InputEvent> {
    match event {
        egui::Event::Key {
            key,
            pressed: true,
            repeat: false,
            ..
        } => convert_key(*key).map(InputEvent::KeyPressed),
        egui::Event::PointerButton {
            pos,
            button,
            pressed,
            ..
        } => {
            let button = match button {
                egui::PointerButton::Primary => MouseButton::Left,
                egui::PointerButton::Secondary => MouseButton::Right,
                egui::PointerButton::Middle => MouseButton::Middle,
                _ => return None,
            };
            Some(InputEvent::MouseButton {
                button,
                pressed: *pressed,
                x: pos.x * ppp,
                y: pos.y * ppp,
            })
        }
        egui::Event::PointerMoved(pos) => Some(InputEvent::CursorMoved {
            x: pos.x * ppp,
            y: pos.y * ppp,
        }),
        egui::Event::MouseWheel { delta, .. } if delta.y != 0.0 => Some(InputEvent::Scroll(delta.y)),
        _ => None,
    }
}

fn convert_key(key: egui::Key) -> Option<Key> {
    use egui::Key as E;
    Some(match key {
        E::Num1 => Key::Num1,
        E::Num2 => Key::Num2,
        E::Num3 => Key::Num3,
        E::Num4 => Key::Num4,
        E::Num5 => Key::Num5,
        E::Num7 => Key::Num7,
        E::Num8 => Key::Num8,
        E::Num9 => Key::Num9,
        E::W => Key::W,
        E::A => Key::A,
        E::S => Key::S,
        E::D => Key::D,
        E::R => Key::R,
        E::F => Key::F,
        E::H => Key::H,
        E::I => Key::I,
        E::K => Key::K,
        E::L => Key::L,
        E::M => Key::M,
        E::X => Key::X,
        E::Z => Key::Z,
        E::F1 => Key::F1,
        E::F2 => Key::F2,
        E::F3 => Key::F3,
        E::F5 => Key::F5,
        E::Space => Key::Space,
        E::ArrowUp => Key::Up,
        E::ArrowDown => Key::Down,
        E::ArrowLeft => Key::Left,
        E::ArrowRight => Key::Right,
        E::Period => Key::Period,
        E::Comma => Key::Comma,
        E::PageUp => Key::PageUp,
        E::PageDown => Key::PageDown,
        _ => return None,
    })
}

/// Native file dialog filtered to the supported mesh formats.
pub struct RfdPicker {
    pub start_dir: PathBuf,
}

impl ScenePicker for RfdPicker {
    fn pick_scene(&mut self) -> Option<PathBuf> {
        rfd::FileDialog::new()
            .add_filter("Scenes", &["obj", "ply"])
            .set_directory(&self.start_dir)
            .pick_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(convert_key(egui::Key::ArrowUp), Some(Key::Up));
        assert_eq!(convert_key(egui::Key::Num6), None);
        assert_eq!(convert_key(egui::Key::Escape), None);
    }

    #[test]
    fn test_event_conversion() {
        let ev = egui::Event::PointerMoved(egui::pos2(10.0, 4.0));
        assert_eq!(convert_event(&ev, 2.0), Some(InputEvent::CursorMoved { x: 20.0, y: 8.0 }));

        let ev = egui::Event::Key {
            key: egui::Key::F5,
            physical_key: None,
            pressed: true,
            repeat: true,
            modifiers: egui::Modifiers::NONE,
        };
        assert_eq!(convert_event(&ev, 1.0), None);
    }
}
