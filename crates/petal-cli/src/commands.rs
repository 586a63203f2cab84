//! Command handlers for the Petal CLI

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

use petal_core::{
    AdminNotification, ChatMessage, InboundEvent, OnlineStatus, SenderType, TicketMessage, Topic,
};
use petal_realtime::{
    ConnectOptions, ConnectionState, ConnectionStatus, Conversation, ListenerHandle,
    RealtimeService, WebSocketConnector,
};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Chat {
                session,
                guest_id,
                token,
                staff,
            } => Self::handle_chat_command(config, session, guest_id, token, staff).await,
            Commands::Admin { token } => Self::handle_admin_command(config, token).await,
            Commands::Ticket { id, token, staff } => {
                Self::handle_ticket_command(config, id, token, staff).await
            }
            Commands::Config { write } => Self::handle_config_command(write),
        }
    }

    /// Join a chat session; stdin lines are sent optimistically
    async fn handle_chat_command(
        config: AppConfig,
        session: String,
        guest_id: Option<String>,
        token: Option<String>,
        staff: bool,
    ) -> Result<()> {
        let painter = Painter::new(config.cli.colored_output);
        let service = RealtimeService::new(config.realtime.clone(), WebSocketConnector::new());
        let _status = watch_connection(&service, painter);

        let token = token.or_else(|| config.identity.token.clone());
        let mut options = match token {
            Some(token) => ConnectOptions::authenticated(token),
            None => ConnectOptions::default(),
        };
        if !staff {
            options.guest_id = Some(guest_id.unwrap_or_else(|| config.guest_id()));
        }
        let options = options.with_session(session.as_str());

        info!("Joining chat session {}", session);
        service.connect(options).await?;

        let sender_type = if staff {
            SenderType::Staff
        } else {
            SenderType::Customer
        };
        let mut conversation = Conversation::open(&service, &session, sender_type);
        if let Some(name) = &config.cli.display_name {
            conversation = conversation.with_sender_name(name.clone());
        }

        let printer = service.subscribe_to_session(&session, move |message| {
            println!("{}", format_message(message, painter));
        });
        let typing = service.subscribe_to_typing(&session, move |indicator| {
            if indicator.sender_type != sender_type && indicator.typing {
                println!("{}", painter.dim(&format!("{} is typing...", sender_label(indicator.sender_type))));
            }
        });
        if let Err(e) = conversation.mark_read() {
            warn!("Could not mark session read: {}", e);
        }

        let mut lines = stdin_lines();
        loop {
            prompt(&config.cli.prompt);
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        let line = line.trim();
                        if line == "/quit" {
                            break;
                        }
                        if line.is_empty() {
                            continue;
                        }
                        if let Err(failure) = conversation.send_text(line).await {
                            println!("{}", painter.red(&format!("Not sent ({}): {}", failure.error, failure.draft)));
                        }
                    }
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        printer.unsubscribe();
        typing.unsubscribe();
        conversation.close();
        service.disconnect().await;
        Ok(())
    }

    /// Print back-office notifications until interrupted
    async fn handle_admin_command(config: AppConfig, token: Option<String>) -> Result<()> {
        let painter = Painter::new(config.cli.colored_output);
        let token = token
            .or_else(|| config.identity.token.clone())
            .ok_or_else(|| CliError::Config("Admin notifications need a staff token".to_string()))?;

        let service = RealtimeService::new(config.realtime.clone(), WebSocketConnector::new());
        let _status = watch_connection(&service, painter);
        service.connect(ConnectOptions::authenticated(token)).await?;

        let notifications = service.subscribe(Topic::AdminNotifications, move |event| {
            if let InboundEvent::Notification(notification) = event {
                println!("{}", painter.bold(&format_notification(notification)));
            }
        });
        let presence = service.subscribe_to_online_status(move |status| {
            println!("{}", painter.dim(&format_online_status(status)));
        });

        info!("Watching admin notifications... Press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;

        notifications.unsubscribe();
        presence.unsubscribe();
        service.disconnect().await;
        Ok(())
    }

    /// Follow a support ticket; stdin lines are posted as replies
    async fn handle_ticket_command(
        config: AppConfig,
        id: String,
        token: Option<String>,
        staff: bool,
    ) -> Result<()> {
        let painter = Painter::new(config.cli.colored_output);
        let service = RealtimeService::new(config.realtime.clone(), WebSocketConnector::new());
        let _status = watch_connection(&service, painter);

        let options = match token.or_else(|| config.identity.token.clone()) {
            Some(token) => ConnectOptions::authenticated(token),
            None => ConnectOptions::guest(config.guest_id()),
        };
        service.connect(options).await?;

        let thread = service.subscribe_to_ticket(&id, move |message| {
            println!("{}", format_ticket_message(message, painter));
        });
        let sender_type = if staff {
            SenderType::Staff
        } else {
            SenderType::Customer
        };

        let mut lines = stdin_lines();
        loop {
            prompt(&config.cli.prompt);
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        let line = line.trim();
                        if line == "/quit" {
                            break;
                        }
                        if line.is_empty() {
                            continue;
                        }
                        if let Err(e) = service.send_ticket_reply(&id, sender_type, line) {
                            println!("{}", painter.red(&format!("Reply not sent: {}", e)));
                        }
                    }
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        thread.unsubscribe();
        service.disconnect().await;
        Ok(())
    }

    /// Print (and optionally write) the example configuration
    fn handle_config_command(write: bool) -> Result<()> {
        println!("{}", AppConfig::example_config());
        if write {
            let path = AppConfig::default_config_path()
                .ok_or_else(|| CliError::Config("No home directory".to_string()))?;
            AppConfig::example().save_to_file(&path)?;
            println!("Wrote {}", path.display());
        }
        Ok(())
    }
}

fn stdin_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

/// Print connection state changes as they happen
fn watch_connection(service: &RealtimeService, painter: Painter) -> ListenerHandle {
    service.on_connection_status(move |status| {
        let line = format_status(status);
        match status.state {
            ConnectionState::Error => eprintln!("{}", painter.red(&line)),
            _ => eprintln!("{}", painter.dim(&line)),
        }
    })
}

// ----------------------------------------------------------------------------
// Formatting
// ----------------------------------------------------------------------------

/// ANSI styling that can be switched off
#[derive(Debug, Clone, Copy)]
pub struct Painter {
    enabled: bool,
}

impl Painter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("\x1B[{}m{}\x1B[0m", code, text)
        } else {
            text.to_string()
        }
    }

    pub fn bold(&self, text: &str) -> String {
        self.paint("1", text)
    }

    pub fn dim(&self, text: &str) -> String {
        self.paint("2", text)
    }

    pub fn red(&self, text: &str) -> String {
        self.paint("31", text)
    }

    pub fn green(&self, text: &str) -> String {
        self.paint("32", text)
    }
}

pub fn sender_label(sender_type: SenderType) -> &'static str {
    match sender_type {
        SenderType::Customer => "customer",
        SenderType::Staff => "staff",
        SenderType::Bot => "bot",
        SenderType::System => "system",
    }
}

pub fn format_message(message: &ChatMessage, painter: Painter) -> String {
    let who = match &message.sender_name {
        Some(name) => format!("{} ({})", name, sender_label(message.sender_type)),
        None => sender_label(message.sender_type).to_string(),
    };
    format!("{} {}", painter.green(&format!("[{}]", who)), message.content)
}

pub fn format_ticket_message(message: &TicketMessage, painter: Painter) -> String {
    format!(
        "{} {}",
        painter.green(&format!("[ticket {} / {}]", message.ticket_id, sender_label(message.sender_type))),
        message.content
    )
}

pub fn format_notification(notification: &AdminNotification) -> String {
    match notification {
        AdminNotification::NewSession(session) => format!(
            "New chat session {} from {}",
            session.session_id,
            session.customer_name.as_deref().unwrap_or("a guest")
        ),
        AdminNotification::NewMessage(message) => {
            format!("New message in session {}: {}", message.session_id, message.content)
        }
        AdminNotification::NewTicket(ticket) => {
            format!("New ticket {}: {}", ticket.ticket_id, ticket.subject)
        }
        AdminNotification::NewOrder(order) => {
            let code = order.order_code.as_deref().unwrap_or(&order.order_id);
            match order.total_amount {
                Some(total) => format!("New order {} ({:.0})", code, total),
                None => format!("New order {}", code),
            }
        }
        AdminNotification::OrderCancelled(order) => {
            let code = order.order_code.as_deref().unwrap_or(&order.order_id);
            match &order.reason {
                Some(reason) => format!("Order {} cancelled: {}", code, reason),
                None => format!("Order {} cancelled", code),
            }
        }
        AdminNotification::Payment(payment) => format!(
            "Payment for order {}: {}",
            payment.order_code.as_deref().unwrap_or(&payment.order_id),
            payment.status.as_deref().unwrap_or("received")
        ),
        AdminNotification::NewReview(review) => match review.rating {
            Some(rating) => format!("New {}-star review on product {}", rating, review.product_id),
            None => format!("New review on product {}", review.product_id),
        },
        AdminNotification::ReviewUpdate(review) => format!(
            "Review on product {} is now {}",
            review.product_id,
            review.status.as_deref().unwrap_or("updated")
        ),
    }
}

pub fn format_online_status(status: &OnlineStatus) -> String {
    let who = status.name.as_deref().unwrap_or(&status.user_id);
    if status.online {
        format!("{} is online", who)
    } else {
        format!("{} went offline", who)
    }
}

pub fn format_status(status: &ConnectionStatus) -> String {
    match status.state {
        ConnectionState::Disconnected if status.retry_count > 0 => format!(
            "Disconnected, retry {}/{}",
            status.retry_count, status.max_retries
        ),
        ConnectionState::Error => format!(
            "Connection error: {}",
            status.last_error.as_deref().unwrap_or("unknown")
        ),
        state => state.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petal_core::{MessageKind, OrderNotice};

    fn plain() -> Painter {
        Painter::new(false)
    }

    #[test]
    fn test_painter_disabled_is_plain() {
        assert_eq!(plain().red("x"), "x");
        assert_eq!(Painter::new(true).bold("x"), "\x1B[1mx\x1B[0m");
    }

    #[test]
    fn test_format_message() {
        let mut message = ChatMessage {
            id: Some(1),
            session_id: "S".to_string(),
            sender_type: SenderType::Staff,
            sender_name: Some("Linh".to_string()),
            content: "Your bouquet ships today".to_string(),
            message_type: MessageKind::Text,
            created_at: None,
            client_id: None,
        };
        assert_eq!(
            format_message(&message, plain()),
            "[Linh (staff)] Your bouquet ships today"
        );

        message.sender_name = None;
        message.sender_type = SenderType::Bot;
        assert_eq!(format_message(&message, plain()), "[bot] Your bouquet ships today");
    }

    #[test]
    fn test_format_notification() {
        let order = OrderNotice {
            order_id: "77".to_string(),
            order_code: Some("ORD-77".to_string()),
            customer_name: None,
            total_amount: Some(450000.0),
            reason: None,
        };
        assert_eq!(
            format_notification(&AdminNotification::NewOrder(order.clone())),
            "New order ORD-77 (450000)"
        );

        let cancelled = OrderNotice {
            order_code: None,
            reason: Some("out of stock".to_string()),
            ..order
        };
        assert_eq!(
            format_notification(&AdminNotification::OrderCancelled(cancelled)),
            "Order 77 cancelled: out of stock"
        );
    }

    #[test]
    fn test_format_status() {
        let mut status = ConnectionStatus::disconnected(5);
        assert_eq!(format_status(&status), "disconnected");

        status.retry_count = 2;
        assert_eq!(format_status(&status), "Disconnected, retry 2/5");

        status.state = ConnectionState::Error;
        status.last_error = Some("broker refused".to_string());
        assert_eq!(format_status(&status), "Connection error: broker refused");
    }

    #[test]
    fn test_format_online_status() {
        let status = OnlineStatus {
            user_id: "u-3".to_string(),
            name: None,
            online: false,
        };
        assert_eq!(format_online_status(&status), "u-3 went offline");
    }
}
