use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
};
use crate::app::App;
use crate::conversation::Role;

const USER_COLOR: Color = Color::Cyan;
const BOT_COLOR: Color = Color::Yellow;

/// Style one line of bot output: `**bold**` and `` `code` `` spans.
/// Unclosed markers are kept as literal text.
fn styled_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let next = [("**", Style::default().add_modifier(Modifier::BOLD)), ("`", Style::default().fg(Color::Green))]
            .into_iter()
            .filter_map(|(marker, style)| rest.find(marker).map(|at| (at, marker, style)))
            .min_by_key(|(at, _, _)| *at);

        let Some((start, marker, style)) = next else {
            spans.push(Span::raw(rest.to_string()));
            break;
        };

        let inner = &rest[start + marker.len()..];
        match inner.find(marker) {
            Some(end) if end > 0 => {
                if start > 0 {
                    spans.push(Span::raw(rest[..start].to_string()));
                }
                spans.push(Span::styled(inner[..end].to_string(), style));
                rest = &inner[end + marker.len()..];
            }
            _ => {
                // Not a span, keep the marker as text
                spans.push(Span::raw(rest[..start + marker.len()].to_string()));
                rest = inner;
            }
        }
    }

    Line::from(spans)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let header = Line::from(vec![
        Span::styled(" AI Chatbot Assistant ", Style::default().fg(Color::Black).bg(USER_COLOR).add_modifier(Modifier::BOLD)),
        Span::styled(format!("  {}", app.base_url), Style::default().fg(Color::DarkGray)),
    ]);
    frame.render_widget(Paragraph::new(header), area);
}

fn chat_lines(app: &App) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();

    for msg in app.conversation.messages() {
        match msg.role() {
            Role::User => {
                lines.push(
                    Line::from(Span::styled("You 👤", Style::default().fg(USER_COLOR).add_modifier(Modifier::BOLD)))
                        .alignment(Alignment::Right),
                );
                for line in msg.text().lines() {
                    lines.push(Line::from(line.to_string()).alignment(Alignment::Right));
                }
            }
            Role::Bot => {
                lines.push(Line::from(Span::styled("🤖 Bot", Style::default().fg(BOT_COLOR).add_modifier(Modifier::BOLD))));
                lines.extend(msg.text().lines().map(styled_line));
            }
        }
        lines.push(Line::default());
    }

    if app.conversation.is_busy() {
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("🤖 Bot is typing{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    lines
}

/// The chat transcript as drawn, without its border. `App::total_chat_lines`
/// measures this same paragraph so scrolling agrees with what is on screen.
pub fn chat_paragraph(app: &App) -> Paragraph<'static> {
    let text = if app.conversation.messages().is_empty() {
        let placeholder = if app.is_loading_history() {
            "Loading previous conversations..."
        } else {
            "No messages yet. Say hello!"
        };
        Text::from(Span::styled(placeholder, Style::default().fg(Color::DarkGray)))
    } else {
        Text::from(chat_lines(app))
    };

    Paragraph::new(text).wrap(Wrap { trim: true })
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Inner size minus borders, for scroll calculations
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);
    if app.follow_latest {
        app.scroll_to_bottom();
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let chat = chat_paragraph(app).block(block).scroll((app.scroll, 0));
    frame.render_widget(chat, area);

    let total = app.total_chat_lines();
    if total > app.chat_height {
        let mut state = ScrollbarState::new(total.saturating_sub(app.chat_height) as usize)
            .position(app.scroll as usize);
        frame.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight),
            area,
            &mut state,
        );
    }
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let busy = app.conversation.is_busy();
    let loading = app.conversation.is_loading_history();
    let border_color = if busy || loading { Color::DarkGray } else { BOT_COLOR };
    let title = if busy {
        " Waiting for reply... "
    } else if loading {
        " Loading history... "
    } else {
        " Message (Enter to send) "
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    let input = app.conversation.input();

    // Horizontal scrolling keeps the cursor visible
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = input.cursor();
    let scroll_offset = if inner_width == 0 {
        0
    } else {
        (cursor_pos + 1).saturating_sub(inner_width)
    };

    let paragraph = if input.is_empty() {
        Paragraph::new(Span::styled("Type a message...", Style::default().fg(Color::DarkGray)))
    } else {
        let visible: String = input.text().chars().skip(scroll_offset).take(inner_width).collect();
        Paragraph::new(visible).style(Style::default().fg(USER_COLOR))
    };
    frame.render_widget(paragraph.block(block), area);

    let cursor_x = (cursor_pos - scroll_offset) as u16;
    frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let footer = match &app.status {
        Some(status) => Line::from(Span::styled(format!(" {}", status), Style::default().fg(Color::Red))),
        None => Line::from(Span::styled(
            " Enter send · ↑/↓ PgUp/PgDn scroll · Esc quit",
            Style::default().fg(Color::DarkGray),
        )),
    };
    frame.render_widget(Paragraph::new(footer), area);
}
