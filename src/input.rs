use crate::settings::TracerSettings;
use glam::Vec2;
use winit::event::{DeviceEvent, ElementState, MouseButton, WindowEvent};
use winit::keyboard::{Key, NamedKey};

/// Discrete actions triggered by a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    MoreLights,
    FewerLights,
    MoreBounces,
    FewerBounces,
    MoreReflect,
    LessReflect,
    LargerWorkGroups,
    SmallerWorkGroups,
    MoreSupersampling,
    LessSupersampling,
    StartBenchmark,
    /// Zero-based model slot, bound to the digit keys 1 to 9.
    ToggleModel(usize),
    Quit,
}

impl Command {
    fn from_key(key: &Key) -> Option<Self> {
        match key {
            Key::Named(NamedKey::Escape) => Some(Self::Quit),
            Key::Character(ch) => match ch.to_lowercase().as_str() {
                "r" => Some(Self::MoreLights),
                "f" => Some(Self::FewerLights),
                "t" => Some(Self::MoreBounces),
                "g" => Some(Self::FewerBounces),
                "y" => Some(Self::MoreReflect),
                "h" => Some(Self::LessReflect),
                "u" => Some(Self::LargerWorkGroups),
                "j" => Some(Self::SmallerWorkGroups),
                "i" => Some(Self::MoreSupersampling),
                "k" => Some(Self::LessSupersampling),
                "m" => Some(Self::StartBenchmark),
                digit => match digit.parse::<usize>() {
                    Ok(n @ 1..=9) => Some(Self::ToggleModel(n - 1)),
                    _ => None,
                },
            },
            _ => None,
        }
    }

    /// Applies a settings command. Returns `false` for commands the app handles itself.
    pub fn apply(self, settings: &mut TracerSettings) -> bool {
        match self {
            Self::MoreLights => settings.increase_lights(),
            Self::FewerLights => settings.decrease_lights(),
            Self::MoreBounces => settings.increase_bounces(),
            Self::FewerBounces => settings.decrease_bounces(),
            Self::MoreReflect => settings.increase_reflect(),
            Self::LessReflect => settings.decrease_reflect(),
            Self::LargerWorkGroups => settings.increase_work_group(),
            Self::SmallerWorkGroups => settings.decrease_work_group(),
            Self::MoreSupersampling => settings.increase_supersampling(),
            Self::LessSupersampling => settings.decrease_supersampling(),
            Self::StartBenchmark | Self::ToggleModel(_) | Self::Quit => return false,
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct Input {
    commands: Vec<Command>,
    mouse_delta: Vec2,
    forward_held: bool,
    backward_held: bool,
    left_held: bool,
    right_held: bool,
    look_held: bool,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ev: InputEvent) {
        match ev {
            InputEvent::Key { key, pressed, repeat } => {
                self.apply_movement_key(&key, pressed);
                if pressed && !repeat {
                    self.commands.extend(Command::from_key(&key));
                }
            }
            InputEvent::MouseMove { dx, dy } => {
                if self.look_held {
                    self.mouse_delta += Vec2::new(dx, dy);
                }
            }
            InputEvent::MouseButton { button: MouseButton::Right, pressed } => self.look_held = pressed,
            InputEvent::MouseButton { .. } | InputEvent::Other => {}
        }
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn take_mouse_delta(&mut self) -> Vec2 {
        std::mem::take(&mut self.mouse_delta)
    }

    /// Strafe in `x` (right positive) and travel in `y` (backwards positive).
    pub fn movement(&self) -> Vec2 {
        let axis = |neg: bool, pos: bool| f32::from(u8::from(pos)) - f32::from(u8::from(neg));
        Vec2::new(axis(self.left_held, self.right_held), axis(self.forward_held, self.backward_held))
    }

    /// Drops held keys and pending input, e.g. when a benchmark takes over the camera.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn apply_movement_key(&mut self, key: &Key, pressed: bool) {
        let Key::Character(ch) = key else { return };
        match ch.to_lowercase().as_str() {
            "w" => self.forward_held = pressed,
            "s" => self.backward_held = pressed,
            "a" => self.left_held = pressed,
            "d" => self.right_held = pressed,
            _ => {}
        }
    }
}

pub enum InputEvent {
    Key { key: Key, pressed: bool, repeat: bool },
    MouseMove { dx: f32, dy: f32 },
    MouseButton { button: MouseButton, pressed: bool },
    Other,
}

impl InputEvent {
    pub fn from_window_event(ev: &WindowEvent) -> Self {
        match ev {
            WindowEvent::MouseInput { state, button, .. } => {
                InputEvent::MouseButton { button: *button, pressed: *state == ElementState::Pressed }
            }
            WindowEvent::KeyboardInput { event, .. } => InputEvent::Key {
                key: event.logical_key.clone(),
                pressed: event.state == ElementState::Pressed,
                repeat: event.repeat,
            },
            _ => InputEvent::Other,
        }
    }

    pub fn from_device_event(ev: &DeviceEvent) -> Self {
        match ev {
            DeviceEvent::MouseMotion { delta: (dx, dy) } => InputEvent::MouseMove { dx: *dx as f32, dy: *dy as f32 },
            _ => InputEvent::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ch: &str, pressed: bool) -> InputEvent {
        InputEvent::Key { key: Key::Character(ch.into()), pressed, repeat: false }
    }

    #[test]
    fn keys_map_to_commands_on_press_only() {
        let mut input = Input::new();
        input.push(key("R", true));
        input.push(key("r", false));
        input.push(InputEvent::Key { key: Key::Character("t".into()), pressed: true, repeat: true });
        input.push(key("3", true));
        input.push(key("0", true));
        assert_eq!(input.take_commands(), vec![Command::MoreLights, Command::ToggleModel(2)]);
        assert!(input.take_commands().is_empty());
    }

    #[test]
    fn movement_tracks_held_keys() {
        let mut input = Input::new();
        input.push(key("w", true));
        input.push(key("d", true));
        assert_eq!(input.movement(), Vec2::new(1.0, -1.0));
        input.push(key("w", false));
        assert_eq!(input.movement(), Vec2::new(1.0, 0.0));
    }

    #[test]
    fn mouse_look_requires_right_button() {
        let mut input = Input::new();
        input.push(InputEvent::MouseMove { dx: 3.0, dy: 1.0 });
        assert_eq!(input.take_mouse_delta(), Vec2::ZERO);
        input.push(InputEvent::MouseButton { button: MouseButton::Right, pressed: true });
        input.push(InputEvent::MouseMove { dx: 3.0, dy: 1.0 });
        assert_eq!(input.take_mouse_delta(), Vec2::new(3.0, 1.0));
    }

    #[test]
    fn settings_commands_apply() {
        let mut settings = TracerSettings::default();
        let before = settings.num_bounces;
        assert!(Command::MoreBounces.apply(&mut settings));
        assert_eq!(settings.num_bounces, before + 1);
        assert!(!Command::ToggleModel(0).apply(&mut settings));
    }
}
