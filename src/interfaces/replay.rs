use super::csv::command_reader::{CommandKind, CommandRow};
use crate::application::booking_service::{BookingRequest, BookingService};
use crate::domain::booking::BookingSummary;
use crate::domain::escrow::CardDetails;
use crate::domain::ids::{Actor, BookingId, ServiceId, UserId};
use crate::domain::otp::OtpCode;
use crate::error::{BookingError, Result};
use std::collections::{BTreeMap, HashMap};

struct Labelled {
    id: BookingId,
    client: Actor,
}

/// Drives a `BookingService` from command rows, standing in for the API layer.
///
/// Issued codes are remembered per booking so a `verify` row may leave its
/// code empty to submit the one the client was given.
pub struct Replay {
    service: BookingService,
    labels: BTreeMap<String, Labelled>,
    codes: HashMap<BookingId, OtpCode>,
}

impl Replay {
    pub fn new(service: BookingService) -> Self {
        Self {
            service,
            labels: BTreeMap::new(),
            codes: HashMap::new(),
        }
    }

    pub fn service(&self) -> &BookingService {
        &self.service
    }

    pub async fn apply(&mut self, row: CommandRow) -> Result<()> {
        let actor = Actor {
            user_id: UserId(row.actor),
            role: row.role,
        };

        match row.command {
            CommandKind::Create => return self.create(actor, row).await,
            CommandKind::Verify => {
                let id = self.resolve(&row.booking)?;
                let code = match row.code {
                    Some(code) => code,
                    None => self
                        .codes
                        .get(&id)
                        .map(|code| code.as_str().to_string())
                        .unwrap_or_default(),
                };
                self.service.verify_otp(id, &code, &actor).await?;
            }
            CommandKind::Reissue => {
                let id = self.resolve(&row.booking)?;
                let code = self.service.reissue_otp(id, &actor).await?;
                self.codes.insert(id, code);
            }
            CommandKind::Confirm => {
                let id = self.resolve(&row.booking)?;
                self.service.confirm_booking(id, &actor).await?;
            }
            CommandKind::Start => {
                let id = self.resolve(&row.booking)?;
                self.service.start_service(id, &actor).await?;
            }
            CommandKind::Complete => {
                let id = self.resolve(&row.booking)?;
                self.service.complete_service(id, &actor).await?;
            }
            CommandKind::Cancel => {
                let id = self.resolve(&row.booking)?;
                self.service.cancel_booking(id, &actor).await?;
            }
        }
        Ok(())
    }

    /// Every labelled booking, in label order.
    pub async fn bookings(&self) -> Result<Vec<(String, BookingSummary)>> {
        let mut rows = Vec::with_capacity(self.labels.len());
        for (label, entry) in &self.labels {
            let summary = self.service.get_booking(entry.id, &entry.client).await?;
            rows.push((label.clone(), summary));
        }
        Ok(rows)
    }

    async fn create(&mut self, actor: Actor, row: CommandRow) -> Result<()> {
        if self.labels.contains_key(&row.booking) {
            return Err(BookingError::Validation(format!(
                "Booking label '{}' is already in use",
                row.booking
            )));
        }

        let missing = |column: &str| BookingError::Validation(format!("create requires a {column}"));
        let request = BookingRequest {
            service_id: ServiceId(row.service.ok_or_else(|| missing("service"))?),
            start: row.start.ok_or_else(|| missing("start"))?,
            end: row.end.ok_or_else(|| missing("end"))?,
            location: row.location.ok_or_else(|| missing("location"))?,
            card: CardDetails {
                number: row.card.ok_or_else(|| missing("card"))?,
                holder: format!("user {}", actor.user_id),
            },
        };

        let created = self.service.create_booking(&actor, request).await?;
        self.codes.insert(created.booking.id, created.otp_code);
        self.labels.insert(
            row.booking,
            Labelled {
                id: created.booking.id,
                client: actor,
            },
        );
        Ok(())
    }

    fn resolve(&self, label: &str) -> Result<BookingId> {
        self.labels
            .get(label)
            .map(|entry| entry.id)
            .ok_or_else(|| BookingError::not_found("booking", label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BookingConfig;
    use crate::domain::booking::BookingState;
    use crate::domain::escrow::{EscrowStatus, LedgerAccount};
    use crate::domain::ids::Role;
    use crate::domain::money::{Amount, Balance};
    use crate::domain::ports::ServiceListing;
    use crate::infrastructure::in_memory::{InMemoryBookingStore, InMemoryCatalog};
    use chrono::{Duration, Utc};

    fn replay() -> Replay {
        let catalog = InMemoryCatalog::from_listings([ServiceListing {
            service_id: ServiceId(10),
            provider_id: UserId(7),
            price: Amount::new(10_000).unwrap(),
        }]);
        Replay::new(BookingService::new(
            Box::new(InMemoryBookingStore::new()),
            Box::new(catalog),
            BookingConfig::default(),
        ))
    }

    fn row(command: CommandKind, actor: u64, role: Role) -> CommandRow {
        CommandRow {
            command,
            booking: "b1".to_string(),
            actor,
            role,
            service: None,
            start: None,
            end: None,
            location: None,
            code: None,
            card: None,
        }
    }

    fn create_row() -> CommandRow {
        let start = Utc::now() + Duration::days(1);
        CommandRow {
            service: Some(10),
            start: Some(start),
            end: Some(start + Duration::hours(1)),
            location: Some("12 Elm Street".to_string()),
            card: Some("4111111111111111".to_string()),
            ..row(CommandKind::Create, 1, Role::Client)
        }
    }

    #[tokio::test]
    async fn test_replay_full_lifecycle_with_remembered_code() {
        let mut replay = replay();
        replay.apply(create_row()).await.unwrap();
        for command in [
            CommandKind::Verify,
            CommandKind::Confirm,
            CommandKind::Start,
            CommandKind::Complete,
        ] {
            replay.apply(row(command, 7, Role::Provider)).await.unwrap();
        }

        let bookings = replay.bookings().await.unwrap();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].0, "b1");
        assert_eq!(bookings[0].1.booking.state, BookingState::Completed);
        assert_eq!(
            bookings[0].1.escrow.as_ref().unwrap().status,
            EscrowStatus::Released
        );
        assert_eq!(
            replay
                .service()
                .balance_of(LedgerAccount::Provider(UserId(7)))
                .await
                .unwrap(),
            Balance(9_500)
        );
    }

    #[tokio::test]
    async fn test_replay_rejects_unknown_label_and_duplicates() {
        let mut replay = replay();
        assert!(matches!(
            replay.apply(row(CommandKind::Cancel, 1, Role::Client)).await,
            Err(BookingError::NotFound { .. })
        ));

        replay.apply(create_row()).await.unwrap();
        assert!(matches!(
            replay.apply(create_row()).await,
            Err(BookingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_replay_every_command_resolves_its_label() {
        let mut replay = replay();
        for command in [
            CommandKind::Verify,
            CommandKind::Reissue,
            CommandKind::Confirm,
            CommandKind::Start,
            CommandKind::Complete,
            CommandKind::Cancel,
        ] {
            assert!(matches!(
                replay.apply(row(command, 7, Role::Provider)).await,
                Err(BookingError::NotFound { entity: "booking", .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_replay_create_requires_columns() {
        let mut replay = replay();
        let mut incomplete = create_row();
        incomplete.card = None;
        assert!(matches!(
            replay.apply(incomplete).await,
            Err(BookingError::Validation(message)) if message.contains("card")
        ));
    }
}
