use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crate::app::App;
use crate::tui::AppEvent;

/// Lines moved per mouse wheel notch or arrow key.
const SCROLL_STEP: u16 = 3;

pub fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::ScrollUp => app.scroll_up(SCROLL_STEP),
        AppEvent::ScrollDown => app.scroll_down(SCROLL_STEP),
        AppEvent::Resize => {}
        AppEvent::Tick => app.tick_animation(),
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match key.code {
        KeyCode::Char('c') if ctrl => app.should_quit = true,
        KeyCode::Esc => app.should_quit = true,

        KeyCode::Enter => app.submit_input(),

        // Chat scrolling
        KeyCode::Up => app.scroll_up(1),
        KeyCode::Down => app.scroll_down(1),
        KeyCode::PageUp => app.scroll_up(app.half_page()),
        KeyCode::PageDown => app.scroll_down(app.half_page()),
        KeyCode::Char('u') if ctrl => app.scroll_up(app.half_page()),
        KeyCode::Char('d') if ctrl => app.scroll_down(app.half_page()),

        // Input editing
        KeyCode::Backspace => app.conversation.input_mut().backspace(),
        KeyCode::Delete => app.conversation.input_mut().delete(),
        KeyCode::Left => app.conversation.input_mut().move_left(),
        KeyCode::Right => app.conversation.input_mut().move_right(),
        KeyCode::Home => app.conversation.input_mut().move_home(),
        KeyCode::End => app.conversation.input_mut().move_end(),
        KeyCode::Char('a') if ctrl => app.conversation.input_mut().move_home(),
        KeyCode::Char('e') if ctrl => app.conversation.input_mut().move_end(),
        KeyCode::Char(c) if !ctrl => app.conversation.input_mut().insert(c),

        _ => {}
    }
}
