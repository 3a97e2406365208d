use super::*;

impl HealthDb {
    // =========================================================================
    // Activity facts (writes)
    // =========================================================================

    pub fn record_login(
        &self,
        org_id: &str,
        account_id: &str,
        user_email: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO account_logins (org_id, account_id, user_email, occurred_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![org_id, account_id, user_email, timestamp(at)],
        )?;
        Ok(())
    }

    pub fn record_contact(
        &self,
        org_id: &str,
        account_id: &str,
        channel: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO account_contacts (org_id, account_id, channel, occurred_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![org_id, account_id, channel, timestamp(at)],
        )?;
        Ok(())
    }

    pub fn record_meeting(
        &self,
        org_id: &str,
        account_id: &str,
        title: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO account_meetings (org_id, account_id, title, occurred_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![org_id, account_id, title, timestamp(at)],
        )?;
        Ok(())
    }

    pub fn record_usage(
        &self,
        org_id: &str,
        account_id: &str,
        feature: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO usage_events (org_id, account_id, feature, occurred_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![org_id, account_id, feature, timestamp(at)],
        )?;
        Ok(())
    }

    /// Insert or update a support ticket.
    pub fn upsert_ticket(&self, ticket: &DbTicket) -> Result<(), DbError> {
        let opened_at = canonical_timestamp("support_tickets.opened_at", &ticket.opened_at)?;
        let closed_at = canonical_opt("support_tickets.closed_at", ticket.closed_at.as_deref())?;
        self.conn.execute(
            "INSERT INTO support_tickets (id, org_id, account_id, subject, status, priority, opened_at, closed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(org_id, id) DO UPDATE SET
                subject = excluded.subject,
                status = excluded.status,
                priority = excluded.priority,
                closed_at = excluded.closed_at",
            params![
                ticket.id,
                ticket.org_id,
                ticket.account_id,
                ticket.subject,
                ticket.status,
                ticket.priority,
                opened_at,
                closed_at,
            ],
        )?;
        Ok(())
    }

    /// Insert or update an invoice.
    pub fn upsert_invoice(&self, invoice: &DbInvoice) -> Result<(), DbError> {
        let issued_at = canonical_timestamp("invoices.issued_at", &invoice.issued_at)?;
        let due_at = canonical_timestamp("invoices.due_at", &invoice.due_at)?;
        let paid_at = canonical_opt("invoices.paid_at", invoice.paid_at.as_deref())?;
        self.conn.execute(
            "INSERT INTO invoices (id, org_id, account_id, amount, issued_at, due_at, paid_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(org_id, id) DO UPDATE SET
                amount = excluded.amount,
                due_at = excluded.due_at,
                paid_at = excluded.paid_at,
                status = excluded.status",
            params![
                invoice.id,
                invoice.org_id,
                invoice.account_id,
                invoice.amount,
                issued_at,
                due_at,
                paid_at,
                invoice.status,
            ],
        )?;
        Ok(())
    }

    // =========================================================================
    // Activity facts (aggregates)
    // =========================================================================

    pub fn last_login_at(&self, org_id: &str, account_id: &str) -> Result<Option<String>, DbError> {
        self.max_occurred_at("account_logins", org_id, account_id)
    }

    pub fn last_contact_at(&self, org_id: &str, account_id: &str) -> Result<Option<String>, DbError> {
        self.max_occurred_at("account_contacts", org_id, account_id)
    }

    pub fn last_meeting_at(&self, org_id: &str, account_id: &str) -> Result<Option<String>, DbError> {
        self.max_occurred_at("account_meetings", org_id, account_id)
    }

    /// Logins at or after `since`.
    pub fn count_logins_since(
        &self,
        org_id: &str,
        account_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, DbError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM account_logins
             WHERE org_id = ?1 AND account_id = ?2 AND occurred_at >= ?3",
            params![org_id, account_id, timestamp(since)],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Open and pending tickets count as unresolved.
    pub fn ticket_counts(&self, org_id: &str, account_id: &str) -> Result<TicketCounts, DbError> {
        let (open, urgent): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN priority = 'urgent' THEN 1 ELSE 0 END), 0)
             FROM support_tickets
             WHERE org_id = ?1 AND account_id = ?2 AND status IN ('open', 'pending')",
            params![org_id, account_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(TicketCounts {
            open: open as u32,
            urgent_open: urgent as u32,
        })
    }

    /// Billing totals for invoices issued at or after `since`. Void invoices
    /// are excluded; open invoices past `due_at` relative to `now` are overdue.
    pub fn invoice_totals(
        &self,
        org_id: &str,
        account_id: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<InvoiceTotals, DbError> {
        let (count, billed, paid, overdue): (i64, f64, f64, i64) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(amount), 0.0),
                    COALESCE(SUM(CASE WHEN status = 'paid' THEN amount ELSE 0.0 END), 0.0),
                    COALESCE(SUM(CASE WHEN status = 'open' AND due_at < ?4 THEN 1 ELSE 0 END), 0)
             FROM invoices
             WHERE org_id = ?1 AND account_id = ?2 AND status != 'void' AND issued_at >= ?3",
            params![org_id, account_id, timestamp(since), timestamp(now)],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        Ok(InvoiceTotals {
            invoice_count: count as u32,
            billed,
            paid,
            overdue_count: overdue as u32,
        })
    }

    /// Feature breadth and recency for usage at or after `since`.
    pub fn usage_summary(
        &self,
        org_id: &str,
        account_id: &str,
        since: DateTime<Utc>,
    ) -> Result<UsageSummary, DbError> {
        let (distinct, events, last): (i64, i64, Option<String>) = self.conn.query_row(
            "SELECT COUNT(DISTINCT feature), COUNT(*), MAX(occurred_at)
             FROM usage_events
             WHERE org_id = ?1 AND account_id = ?2 AND occurred_at >= ?3",
            params![org_id, account_id, timestamp(since)],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(UsageSummary {
            distinct_features: distinct as u32,
            event_count: events as u32,
            last_used_at: last,
        })
    }

    fn max_occurred_at(
        &self,
        table: &'static str,
        org_id: &str,
        account_id: &str,
    ) -> Result<Option<String>, DbError> {
        let sql = format!(
            "SELECT MAX(occurred_at) FROM {} WHERE org_id = ?1 AND account_id = ?2",
            table
        );
        let last: Option<String> =
            self.conn
                .query_row(&sql, params![org_id, account_id], |row| row.get(0))?;
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::db::test_utils::seeded_db;
    use crate::db::{timestamp, DbInvoice, DbTicket};

    fn ticket(id: &str, status: &str, priority: &str) -> DbTicket {
        DbTicket {
            id: id.to_string(),
            org_id: "org-1".to_string(),
            account_id: "acme".to_string(),
            subject: format!("Ticket {}", id),
            status: status.to_string(),
            priority: priority.to_string(),
            opened_at: "2025-03-01T00:00:00Z".to_string(),
            closed_at: None,
        }
    }

    fn invoice(id: &str, amount: f64, status: &str, issued: &str, due: &str) -> DbInvoice {
        DbInvoice {
            id: id.to_string(),
            org_id: "org-1".to_string(),
            account_id: "acme".to_string(),
            amount,
            issued_at: issued.to_string(),
            due_at: due.to_string(),
            paid_at: None,
            status: status.to_string(),
        }
    }

    #[test]
    fn test_last_login_and_window_count() {
        let db = seeded_db("org-1", &["acme"]);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        db.record_login("org-1", "acme", None, now - Duration::days(40)).unwrap();
        db.record_login("org-1", "acme", Some("a@acme.com"), now - Duration::days(3)).unwrap();
        db.record_login("org-1", "acme", None, now - Duration::days(1)).unwrap();

        assert_eq!(
            db.last_login_at("org-1", "acme").unwrap(),
            Some(timestamp(now - Duration::days(1)))
        );
        assert_eq!(
            db.count_logins_since("org-1", "acme", now - Duration::days(30)).unwrap(),
            2
        );
        assert_eq!(db.last_contact_at("org-1", "acme").unwrap(), None);
    }

    #[test]
    fn test_ticket_counts_only_unresolved() {
        let db = seeded_db("org-1", &["acme"]);
        db.upsert_ticket(&ticket("t1", "open", "urgent")).unwrap();
        db.upsert_ticket(&ticket("t2", "pending", "normal")).unwrap();
        db.upsert_ticket(&ticket("t3", "closed", "urgent")).unwrap();

        let counts = db.ticket_counts("org-1", "acme").unwrap();
        assert_eq!(counts.open, 2);
        assert_eq!(counts.urgent_open, 1);

        // Closing a ticket through upsert drops it from the count.
        let mut closed = ticket("t1", "closed", "urgent");
        closed.closed_at = Some("2025-03-02T00:00:00Z".to_string());
        db.upsert_ticket(&closed).unwrap();
        assert_eq!(db.ticket_counts("org-1", "acme").unwrap().open, 1);
    }

    #[test]
    fn test_invoice_totals() {
        let db = seeded_db("org-1", &["acme"]);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        db.upsert_invoice(&invoice("i1", 1000.0, "paid", "2025-03-01T00:00:00Z", "2025-03-31T00:00:00Z"))
            .unwrap();
        db.upsert_invoice(&invoice("i2", 500.0, "open", "2025-04-01T00:00:00Z", "2025-05-01T00:00:00Z"))
            .unwrap();
        db.upsert_invoice(&invoice("i3", 500.0, "open", "2025-05-20T00:00:00Z", "2025-06-20T00:00:00Z"))
            .unwrap();
        db.upsert_invoice(&invoice("i4", 9999.0, "void", "2025-04-01T00:00:00Z", "2025-05-01T00:00:00Z"))
            .unwrap();
        db.upsert_invoice(&invoice("old", 300.0, "open", "2024-01-01T00:00:00Z", "2024-02-01T00:00:00Z"))
            .unwrap();

        let totals = db
            .invoice_totals("org-1", "acme", now - Duration::days(180), now)
            .unwrap();
        assert_eq!(totals.invoice_count, 3);
        assert!((totals.billed - 2000.0).abs() < 1e-9);
        assert!((totals.paid - 1000.0).abs() < 1e-9);
        assert_eq!(totals.overdue_count, 1);
    }

    #[test]
    fn test_invoice_due_later_today_in_sqlite_format_is_not_overdue() {
        let db = seeded_db("org-1", &["acme"]);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        db.upsert_invoice(&invoice("i1", 100.0, "open", "2025-05-01 00:00:00", "2025-06-01 17:00:00"))
            .unwrap();

        let totals = db
            .invoice_totals("org-1", "acme", now - Duration::days(180), now)
            .unwrap();
        assert_eq!(totals.invoice_count, 1);
        assert_eq!(totals.overdue_count, 0);

        let stored: String = db
            .conn_ref()
            .query_row("SELECT due_at FROM invoices WHERE id = 'i1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, "2025-06-01T17:00:00Z");
    }

    #[test]
    fn test_offset_timestamps_are_stored_as_utc() {
        let db = seeded_db("org-1", &["acme"]);
        let mut t = ticket("t1", "closed", "normal");
        t.opened_at = "2025-03-01T09:00:00+02:00".to_string();
        t.closed_at = Some("2025-03-01 12:00:00".to_string());
        db.upsert_ticket(&t).unwrap();

        let (opened, closed): (String, String) = db
            .conn_ref()
            .query_row(
                "SELECT opened_at, closed_at FROM support_tickets WHERE id = 't1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(opened, "2025-03-01T07:00:00Z");
        assert_eq!(closed, "2025-03-01T12:00:00Z");
    }

    #[test]
    fn test_unparseable_timestamp_is_rejected() {
        let db = seeded_db("org-1", &["acme"]);
        let err = db
            .upsert_invoice(&invoice("i1", 100.0, "open", "2025-05-01T00:00:00Z", "next tuesday"))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::db::DbError::InvalidTimestamp { column: "invoices.due_at", .. }
        ));
    }

    #[test]
    fn test_usage_summary() {
        let db = seeded_db("org-1", &["acme"]);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        db.record_usage("org-1", "acme", "reports", now - Duration::days(2)).unwrap();
        db.record_usage("org-1", "acme", "reports", now - Duration::days(1)).unwrap();
        db.record_usage("org-1", "acme", "automations", now - Duration::days(5)).unwrap();
        db.record_usage("org-1", "acme", "exports", now - Duration::days(50)).unwrap();

        let usage = db.usage_summary("org-1", "acme", now - Duration::days(30)).unwrap();
        assert_eq!(usage.distinct_features, 2);
        assert_eq!(usage.event_count, 3);
        assert_eq!(usage.last_used_at, Some(timestamp(now - Duration::days(1))));
    }

    #[test]
    fn test_aggregates_do_not_cross_tenants() {
        let db = seeded_db("org-1", &["acme"]);
        db.ensure_organization("org-2", "Other").unwrap();
        db.upsert_account(&crate::db::DbAccount {
            id: "acme".into(),
            org_id: "org-2".into(),
            name: "Acme".into(),
            lifecycle: None,
            arr: None,
            archived: false,
            updated_at: timestamp(Utc::now()),
        })
        .unwrap();
        db.record_meeting("org-2", "acme", "QBR", Utc::now()).unwrap();
        assert_eq!(db.last_meeting_at("org-1", "acme").unwrap(), None);
        assert!(db.last_meeting_at("org-2", "acme").unwrap().is_some());
    }
}
