//! Input mapping
//!
//! Converts crossterm key and mouse events into the scancode-free input the
//! engine accepts: Windows virtual-key presses, Unicode characters and RDP
//! pointer events.

use bitflags::bitflags;
use crossterm::event::{
    KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};

use crate::bridge::ConnectionController;
use crate::core::Handle;
use crate::engine::PointerFlags;
use crate::error::Result;

/// Windows virtual-key codes
pub mod vk {
    pub const BACK: u16 = 0x08;
    pub const TAB: u16 = 0x09;
    pub const RETURN: u16 = 0x0D;
    pub const SHIFT: u16 = 0x10;
    pub const CONTROL: u16 = 0x11;
    pub const MENU: u16 = 0x12;
    pub const ESCAPE: u16 = 0x1B;
    pub const SPACE: u16 = 0x20;
    pub const PRIOR: u16 = 0x21;
    pub const NEXT: u16 = 0x22;
    pub const END: u16 = 0x23;
    pub const HOME: u16 = 0x24;
    pub const LEFT: u16 = 0x25;
    pub const UP: u16 = 0x26;
    pub const RIGHT: u16 = 0x27;
    pub const DOWN: u16 = 0x28;
    pub const INSERT: u16 = 0x2D;
    pub const DELETE: u16 = 0x2E;
    pub const KEY_0: u16 = 0x30;
    pub const KEY_A: u16 = 0x41;
    pub const F1: u16 = 0x70;
}

/// Mouse wheel step reported by one notch
pub const WHEEL_STEP: i16 = 120;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// One engine input call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Key { keycode: u16, down: bool },
    Unicode(u32),
    Pointer { x: u16, y: u16, flags: PointerFlags },
}

/// Maps terminal input events to engine input
pub struct InputMapper;

impl InputMapper {
    /// Map a crossterm KeyEvent. Releases are ignored; every mapped key is
    /// sent as a complete press and release.
    pub fn map_key(event: &KeyEvent) -> Vec<InputAction> {
        if event.kind == KeyEventKind::Release {
            return Vec::new();
        }
        let mut mods = Modifiers::from(event.modifiers);

        let keycode = match event.code {
            KeyCode::Char(ch) => {
                if !mods.intersects(Modifiers::CTRL | Modifiers::ALT) {
                    return vec![InputAction::Unicode(ch as u32)];
                }
                // Shift is already folded into the character
                mods.remove(Modifiers::SHIFT);
                match Self::char_keycode(ch) {
                    Some(keycode) => keycode,
                    None => return vec![InputAction::Unicode(ch as u32)],
                }
            }
            KeyCode::Enter => vk::RETURN,
            KeyCode::Backspace => vk::BACK,
            KeyCode::Tab => vk::TAB,
            KeyCode::BackTab => {
                mods |= Modifiers::SHIFT;
                vk::TAB
            }
            KeyCode::Esc => vk::ESCAPE,

            // Arrow keys
            KeyCode::Left => vk::LEFT,
            KeyCode::Up => vk::UP,
            KeyCode::Right => vk::RIGHT,
            KeyCode::Down => vk::DOWN,

            // Navigation keys
            KeyCode::Home => vk::HOME,
            KeyCode::End => vk::END,
            KeyCode::PageUp => vk::PRIOR,
            KeyCode::PageDown => vk::NEXT,
            KeyCode::Insert => vk::INSERT,
            KeyCode::Delete => vk::DELETE,

            KeyCode::F(n @ 1..=24) => vk::F1 + u16::from(n) - 1,

            _ => return Vec::new(),
        };

        Self::chord(keycode, mods)
    }

    /// Virtual key for a character typed with Ctrl or Alt held
    fn char_keycode(ch: char) -> Option<u16> {
        match ch {
            'a'..='z' => Some(vk::KEY_A + (ch as u16 - 'a' as u16)),
            'A'..='Z' => Some(vk::KEY_A + (ch as u16 - 'A' as u16)),
            '0'..='9' => Some(vk::KEY_0 + (ch as u16 - '0' as u16)),
            ' ' => Some(vk::SPACE),
            _ => None,
        }
    }

    /// Press modifiers, tap the key, release modifiers in reverse order
    fn chord(keycode: u16, mods: Modifiers) -> Vec<InputAction> {
        let held: Vec<u16> = [
            (Modifiers::CTRL, vk::CONTROL),
            (Modifiers::ALT, vk::MENU),
            (Modifiers::SHIFT, vk::SHIFT),
        ]
        .into_iter()
        .filter(|(flag, _)| mods.contains(*flag))
        .map(|(_, code)| code)
        .collect();

        let mut actions = Vec::with_capacity(held.len() * 2 + 2);
        actions.extend(held.iter().map(|&keycode| InputAction::Key { keycode, down: true }));
        actions.push(InputAction::Key { keycode, down: true });
        actions.push(InputAction::Key { keycode, down: false });
        actions.extend(held.iter().rev().map(|&keycode| InputAction::Key { keycode, down: false }));
        actions
    }

    /// Map a mouse event in terminal cells to a pointer event in desktop
    /// pixels, scaling each cell to `cell_width` x `cell_height`.
    pub fn map_mouse(event: &MouseEvent, cell_width: u16, cell_height: u16) -> Option<InputAction> {
        let flags = match event.kind {
            MouseEventKind::Down(btn) => PointerFlags::DOWN | Self::button_flag(btn),
            MouseEventKind::Up(btn) => Self::button_flag(btn),
            MouseEventKind::Drag(_) | MouseEventKind::Moved => PointerFlags::MOVE,
            MouseEventKind::ScrollUp => PointerFlags::wheel(WHEEL_STEP),
            MouseEventKind::ScrollDown => PointerFlags::wheel(-WHEEL_STEP),
            // Horizontal wheel is not forwarded
            MouseEventKind::ScrollLeft | MouseEventKind::ScrollRight => return None,
        };

        Some(InputAction::Pointer {
            x: event.column.saturating_mul(cell_width),
            y: event.row.saturating_mul(cell_height),
            flags,
        })
    }

    fn button_flag(button: MouseButton) -> PointerFlags {
        match button {
            MouseButton::Left => PointerFlags::BUTTON1,
            MouseButton::Right => PointerFlags::BUTTON2,
            MouseButton::Middle => PointerFlags::BUTTON3,
        }
    }

    /// Send mapped input to a connected session, stopping at the first error
    pub fn apply(
        controller: &ConnectionController,
        handle: Handle,
        actions: &[InputAction],
    ) -> Result<()> {
        for action in actions {
            match *action {
                InputAction::Key { keycode, down } => {
                    controller.send_key_event(handle, keycode, down)?
                }
                InputAction::Unicode(codepoint) => {
                    controller.send_unicode_key_event(handle, codepoint)?
                }
                InputAction::Pointer { x, y, flags } => {
                    controller.send_pointer_event(handle, x, y, flags)?
                }
            }
        }
        Ok(())
    }
}
