use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use crate::app::{App, FocusPane, InputMode};
use crate::transcript::ChatRole;

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("**") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("**") else {
            break;
        };
        if close == 0 {
            // "****" is not emphasis
            spans.push(Span::raw(rest[..open + 4].to_string()));
            rest = &after_open[2..];
            continue;
        }

        if open > 0 {
            spans.push(Span::raw(rest[..open].to_string()));
        }
        spans.push(Span::styled(
            after_open[..close].to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ));
        rest = &after_open[close + 2..];
    }

    if !rest.is_empty() {
        spans.push(Span::raw(rest.to_string()));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

fn border_color(focused: bool) -> Color {
    if focused { Color::Cyan } else { Color::DarkGray }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, API key, transcript, compose, footer
    let [header_area, key_area, chat_area, compose_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_api_key(app, frame, key_area);
    render_transcript(app, frame, chat_area);
    render_compose(app, frame, compose_area);
    render_footer(app, frame, footer_area);

    if app.show_model_picker {
        render_model_picker(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" Local Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(format!("{} ", app.base_url), Style::default().fg(Color::Gray)),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_api_key(app: &App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::ApiKey;
    let editing = focused && app.input_mode == InputMode::Editing;
    let color = if editing { Color::Yellow } else { border_color(focused) };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
        .title(" API Key (K to edit) ");

    let content = if app.api_key.is_empty() {
        Span::styled("none (not needed by most local servers)", Style::default().fg(Color::DarkGray))
    } else {
        Span::styled(app.api_key.masked(), Style::default().fg(Color::Cyan))
    };
    frame.render_widget(Paragraph::new(content).block(block), area);

    // Show cursor at the end of the masked text while editing
    if editing {
        let inner_width = area.width.saturating_sub(2) as usize;
        let shown = app.api_key.masked().chars().count().min(inner_width.saturating_sub(1));
        frame.set_cursor_position((area.x + 1 + shown as u16, area.y + 1));
    }
}

fn role_style(role: ChatRole) -> Style {
    let color = match role {
        ChatRole::User => Color::Cyan,
        ChatRole::Assistant => Color::Yellow,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

/// Wrapped transcript text without borders or scroll.
///
/// Scroll bounds are computed from this same paragraph so they match what is drawn.
pub fn transcript_paragraph(app: &App) -> Paragraph<'_> {
    let mut lines: Vec<Line> = Vec::new();
    for turn in app.session.transcript().turns() {
        lines.push(Line::from(Span::styled(turn.role.label(), role_style(turn.role))));
        match turn.role {
            ChatRole::User => lines.push(Line::from(turn.content.as_str())),
            ChatRole::Assistant => {
                for line in turn.content.lines() {
                    lines.push(parse_markdown_line(line));
                }
            }
        }
        lines.push(Line::default());
    }

    if app.session.is_awaiting() {
        lines.push(Line::from(Span::styled(
            ChatRole::Assistant.label(),
            role_style(ChatRole::Assistant),
        )));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false })
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store area for mouse hit-testing and inner size for scroll calculations
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);
    if app.follow_tail {
        app.scroll_to_bottom();
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color(app.focus == FocusPane::Transcript)))
        .title(format!(" {} ", app.selected_model));

    let chat = transcript_paragraph(app)
        .block(block)
        .scroll((app.chat_scroll, 0));
    frame.render_widget(chat, area);
}

fn render_compose(app: &App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Compose;
    let editing = focused && app.input_mode == InputMode::Editing;
    let color = if editing { Color::Yellow } else { border_color(focused) };

    let title = if app.session.in_flight() {
        " Message (waiting for reply) "
    } else {
        " Message (Enter to send) "
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
        .title(title);

    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let (visible_text, cursor_col) = app.compose.visible(inner_width);

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(block);
    frame.render_widget(input, area);

    if editing {
        frame.set_cursor_position((area.x + 1 + cursor_col as u16, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" EDIT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hint = |key: &'static str, label: &'static str| {
        [Span::styled(key, key_style), Span::styled(label, label_style)]
    };

    let hints: Vec<Span> = if app.show_model_picker {
        [hint(" j/k ", " nav "), hint(" Enter ", " select "), hint(" Esc ", " cancel ")].concat()
    } else {
        match app.input_mode {
            InputMode::Editing if app.focus == FocusPane::ApiKey => {
                [hint(" Enter ", " save key "), hint(" Esc ", " stop typing ")].concat()
            }
            InputMode::Editing => [
                hint(" Enter ", " send "),
                hint(" Tab ", " focus "),
                hint(" Esc ", " stop typing "),
            ]
            .concat(),
            InputMode::Normal => [
                hint(" i ", " type "),
                hint(" j/k ", " scroll "),
                hint(" Tab ", " focus "),
                hint(" K ", " key "),
                hint(" M ", " model "),
                hint(" q ", " quit "),
            ]
            .concat(),
        }
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::styled(" ", label_style)];
    spans.extend(hints);
    if let Some(status) = &app.status {
        spans.push(Span::styled(
            format!(" {} ", status),
            Style::default().bg(Color::Black).fg(Color::Red),
        ));
    }

    let footer = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered)
    let popup_width = 50.min(area.width.saturating_sub(4));
    let popup_height = (app.available_models.len() as u16 + 2).min(area.height.saturating_sub(4));

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Select Model ");

    let items: Vec<ListItem> = app
        .available_models
        .iter()
        .map(|model| {
            let style = if model == &app.selected_model {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", model)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}
