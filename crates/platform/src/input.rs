//! Input event collection.
//!
//! Window events arrive from winit one at a time; the queue turns the ones
//! the engine cares about into [`InputEvent`]s and hands them out in a batch
//! once per frame.

use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, ModifiersState, PhysicalKey};

/// Scroll distance in pixels that counts as one wheel line.
const PIXELS_PER_LINE: f32 = 20.0;

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
    Other(u16),
}

impl MouseButton {
    /// Bit this button occupies in a held-button mask.
    pub fn mask(self) -> u32 {
        match self {
            MouseButton::Left => 1 << 0,
            MouseButton::Middle => 1 << 1,
            MouseButton::Right => 1 << 2,
            MouseButton::Back => 1 << 3,
            MouseButton::Forward => 1 << 4,
            MouseButton::Other(n) if n < 27 => 1 << (5 + n as u32),
            MouseButton::Other(_) => 0,
        }
    }
}

impl From<winit::event::MouseButton> for MouseButton {
    fn from(button: winit::event::MouseButton) -> Self {
        match button {
            winit::event::MouseButton::Left => MouseButton::Left,
            winit::event::MouseButton::Right => MouseButton::Right,
            winit::event::MouseButton::Middle => MouseButton::Middle,
            winit::event::MouseButton::Back => MouseButton::Back,
            winit::event::MouseButton::Forward => MouseButton::Forward,
            winit::event::MouseButton::Other(n) => MouseButton::Other(n),
        }
    }
}

/// One input event delivered to a frame producer.
///
/// Mouse positions are in window pixels; `state` is the mask of buttons
/// held after the event (see [`MouseButton::mask`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    MouseMotion {
        x: f32,
        y: f32,
        state: u32,
    },
    MouseButtonDown {
        x: f32,
        y: f32,
        state: u32,
        button: MouseButton,
        mods: ModifiersState,
    },
    MouseButtonUp {
        x: f32,
        y: f32,
        state: u32,
        button: MouseButton,
        mods: ModifiersState,
    },
    /// Scroll amount in lines.
    MouseWheel { x: f32, y: f32 },
    KeyDown { key: KeyCode, mods: ModifiersState },
    KeyUp { key: KeyCode, mods: ModifiersState },
}

/// Collects input between frames.
#[derive(Debug, Default)]
pub struct InputQueue {
    events: Vec<InputEvent>,
    cursor: (f32, f32),
    buttons: u32,
    mods: ModifiersState,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts a window event, returning `true` if it produced (or
    /// updated state for) engine input.
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor_moved(position.x as f32, position.y as f32);
                true
            }
            WindowEvent::MouseInput { state, button, .. } => {
                self.mouse_button((*button).into(), *state == ElementState::Pressed);
                true
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let (x, y) = match delta {
                    MouseScrollDelta::LineDelta(x, y) => (*x, *y),
                    MouseScrollDelta::PixelDelta(pos) => (
                        pos.x as f32 / PIXELS_PER_LINE,
                        pos.y as f32 / PIXELS_PER_LINE,
                    ),
                };
                self.wheel(x, y);
                true
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(code) = event.physical_key else {
                    return false;
                };
                self.key(code, event.state == ElementState::Pressed, event.repeat);
                true
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                self.set_modifiers(modifiers.state());
                true
            }
            _ => false,
        }
    }

    pub fn cursor_moved(&mut self, x: f32, y: f32) {
        self.cursor = (x, y);
        self.events.push(InputEvent::MouseMotion {
            x,
            y,
            state: self.buttons,
        });
    }

    pub fn mouse_button(&mut self, button: MouseButton, pressed: bool) {
        let (x, y) = self.cursor;
        if pressed {
            self.buttons |= button.mask();
            self.events.push(InputEvent::MouseButtonDown {
                x,
                y,
                state: self.buttons,
                button,
                mods: self.mods,
            });
        } else {
            self.buttons &= !button.mask();
            self.events.push(InputEvent::MouseButtonUp {
                x,
                y,
                state: self.buttons,
                button,
                mods: self.mods,
            });
        }
    }

    pub fn wheel(&mut self, x: f32, y: f32) {
        self.events.push(InputEvent::MouseWheel { x, y });
    }

    /// Records a key transition. Auto-repeat presses are dropped.
    pub fn key(&mut self, key: KeyCode, pressed: bool, repeat: bool) {
        if repeat {
            return;
        }
        let mods = self.mods;
        self.events.push(if pressed {
            InputEvent::KeyDown { key, mods }
        } else {
            InputEvent::KeyUp { key, mods }
        });
    }

    pub fn set_modifiers(&mut self, mods: ModifiersState) {
        self.mods = mods;
    }

    /// Mask of mouse buttons currently held.
    pub fn buttons(&self) -> u32 {
        self.buttons
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Takes every event collected since the last drain, oldest first.
    pub fn drain(&mut self) -> Vec<InputEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_state_mask() {
        let mut queue = InputQueue::new();
        queue.cursor_moved(10.0, 20.0);
        queue.mouse_button(MouseButton::Left, true);
        queue.mouse_button(MouseButton::Right, true);
        queue.cursor_moved(11.0, 21.0);
        queue.mouse_button(MouseButton::Left, false);

        let events = queue.drain();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[0],
            InputEvent::MouseMotion {
                x: 10.0,
                y: 20.0,
                state: 0
            }
        );
        assert!(matches!(
            events[2],
            InputEvent::MouseButtonDown { state: 0b101, button: MouseButton::Right, .. }
        ));
        assert_eq!(
            events[3],
            InputEvent::MouseMotion {
                x: 11.0,
                y: 21.0,
                state: 0b101
            }
        );
        assert!(matches!(
            events[4],
            InputEvent::MouseButtonUp { state: 0b100, button: MouseButton::Left, .. }
        ));
        assert_eq!(queue.buttons(), 0b100);
    }

    #[test]
    fn test_key_repeat_is_ignored() {
        let mut queue = InputQueue::new();
        queue.set_modifiers(ModifiersState::SHIFT);
        queue.key(KeyCode::KeyW, true, false);
        queue.key(KeyCode::KeyW, true, true);
        queue.key(KeyCode::KeyW, true, true);
        queue.key(KeyCode::KeyW, false, false);

        let events = queue.drain();
        assert_eq!(
            events,
            vec![
                InputEvent::KeyDown {
                    key: KeyCode::KeyW,
                    mods: ModifiersState::SHIFT
                },
                InputEvent::KeyUp {
                    key: KeyCode::KeyW,
                    mods: ModifiersState::SHIFT
                },
            ]
        );
    }

    #[test]
    fn test_drain_empties_queue() {
        let mut queue = InputQueue::new();
        queue.wheel(0.0, -1.0);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain(), vec![InputEvent::MouseWheel { x: 0.0, y: -1.0 }]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_unrelated_window_events_are_ignored() {
        let mut queue = InputQueue::new();
        assert!(!queue.handle_window_event(&WindowEvent::CloseRequested));
        assert!(!queue.handle_window_event(&WindowEvent::Focused(true)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_button_conversion() {
        assert_eq!(
            MouseButton::from(winit::event::MouseButton::Middle),
            MouseButton::Middle
        );
        assert_eq!(MouseButton::Other(40).mask(), 0);
        assert_eq!(MouseButton::Other(0).mask(), 1 << 5);
    }
}
