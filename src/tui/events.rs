//! Keyboard handling for the progress view
//!
//! Keys map to a small set of actions. Only [`ViewAction::Interrupt`] reaches
//! outside the view, and only as a shutdown request.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// What a key press asks the view to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewAction {
    ScrollUp,
    ScrollDown,
    PageUp,
    PageDown,
    Home,
    End,
    ToggleFollow,
    Interrupt,
}

/// Helper functions for key event processing
pub mod key_handler {
    use super::*;

    /// Check if a key event matches a specific key combination
    pub fn matches_key(event: &KeyEvent, code: KeyCode, modifiers: KeyModifiers) -> bool {
        event.code == code && event.modifiers == modifiers
    }

    /// Check if a key event is Ctrl+key combination
    pub fn matches_ctrl_key(event: &KeyEvent, code: KeyCode) -> bool {
        matches_key(event, code, KeyModifiers::CONTROL)
    }

    /// Convert key event to a view action
    pub fn key_to_action(event: &KeyEvent) -> Option<ViewAction> {
        // Windows reports releases as well as presses.
        if event.kind == KeyEventKind::Release {
            return None;
        }
        if matches_ctrl_key(event, KeyCode::Char('c')) {
            return Some(ViewAction::Interrupt);
        }
        if !event.modifiers.is_empty() && event.modifiers != KeyModifiers::SHIFT {
            return None;
        }
        match event.code {
            KeyCode::Up | KeyCode::Char('k') => Some(ViewAction::ScrollUp),
            KeyCode::Down | KeyCode::Char('j') => Some(ViewAction::ScrollDown),
            KeyCode::PageUp => Some(ViewAction::PageUp),
            KeyCode::PageDown | KeyCode::Char(' ') => Some(ViewAction::PageDown),
            KeyCode::Home | KeyCode::Char('g') => Some(ViewAction::Home),
            KeyCode::End | KeyCode::Char('G') => Some(ViewAction::End),
            KeyCode::Char('f') => Some(ViewAction::ToggleFollow),
            KeyCode::Char('q') | KeyCode::Esc => Some(ViewAction::Interrupt),
            _ => None,
        }
    }
}
