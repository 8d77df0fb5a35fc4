use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::money::{Money, TaxRate};

use super::conflict::invalid_transition;
use super::{Engine, EngineError};

const AMOUNT_OVERFLOW: EngineError = EngineError::LimitExceeded("invoice amount out of range");

fn find_invoice<'a>(st: &'a UnitState, id: &Ulid) -> Result<&'a Invoice, EngineError> {
    st.invoice(id).ok_or(EngineError::NotFound(*id))
}

fn validate_extra(item: &LineItemDraft) -> Result<(), EngineError> {
    if item.quantity == 0 {
        return Err(EngineError::validation("line item quantity must be positive"));
    }
    if !item.unit_price.is_positive() {
        return Err(EngineError::validation("line item price must be positive"));
    }
    if item.quantity > MAX_LINE_QUANTITY {
        return Err(EngineError::LimitExceeded("line item quantity too large"));
    }
    if item.unit_price > MAX_PRICE {
        return Err(EngineError::LimitExceeded("line item price too large"));
    }
    if item.description.len() > MAX_DESCRIPTION_LEN {
        return Err(EngineError::LimitExceeded("line item description too long"));
    }
    Ok(())
}

/// Accommodation lines for a stay: nights grouped by their captured rate, in
/// order of first appearance. A stay always bills at least one night.
pub(crate) fn accommodation_lines(unit: &Unit, r: &Reservation) -> Result<Vec<LineItem>, EngineError> {
    let nights = r.range.nights().max(1) as usize;
    let mut rates: Vec<Money> = r.nightly_rates.iter().copied().take(nights).collect();
    rates.resize(nights, r.price_at_booking);

    let mut groups: Vec<(Money, u32)> = Vec::new();
    for rate in rates {
        match groups.iter_mut().find(|(price, _)| *price == rate) {
            Some((_, count)) => *count += 1,
            None => groups.push((rate, 1)),
        }
    }
    groups
        .into_iter()
        .map(|(price, count)| {
            LineItem::new(
                LineItemKind::Accommodation,
                format!("{} ({} → {})", unit.name, r.range.check_in, r.range.check_out),
                count,
                price,
            )
            .ok_or(AMOUNT_OVERFLOW)
        })
        .collect()
}

/// Subtotal, tax and total for a set of lines.
pub(crate) fn totals(lines: &[LineItem], discount: Money, rate: TaxRate) -> Result<(Money, Money, Money), EngineError> {
    let subtotal = Money::checked_sum(lines.iter().map(|l| l.line_total)).ok_or(AMOUNT_OVERFLOW)?;
    let taxable = subtotal.checked_sub(discount).ok_or(AMOUNT_OVERFLOW)?;
    let tax = taxable.portion(rate.bps() as i64);
    let total = taxable.checked_add(tax).ok_or(AMOUNT_OVERFLOW)?;
    Ok((subtotal, tax, total))
}

impl Engine {
    /// Bill a stay that has started. One live invoice per reservation.
    pub async fn create_invoice(
        &self,
        id: Ulid,
        reservation_id: Ulid,
        extras: Vec<LineItemDraft>,
        discount: Money,
        draft: bool,
    ) -> Result<Invoice, EngineError> {
        if extras.len() > MAX_LINE_ITEMS {
            return Err(EngineError::LimitExceeded("too many line items"));
        }
        for item in &extras {
            validate_extra(item)?;
        }
        if discount.is_negative() {
            return Err(EngineError::validation("discount cannot be negative"));
        }
        if discount > MAX_PRICE {
            return Err(EngineError::LimitExceeded("invoice discount too large"));
        }

        let (unit_id, mut guard) = self.resolve_entity_write(&reservation_id).await?;
        if self.entity_to_unit.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let r = guard
            .reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        if !matches!(r.status, ReservationStatus::CheckedIn | ReservationStatus::Departed) {
            return Err(invalid_transition("reservation", reservation_id, r.status.as_str(), "invoice"));
        }
        if let Some(existing) = guard.invoice_for(&reservation_id) {
            return Err(EngineError::AlreadyExists(existing.id));
        }

        let mut lines = accommodation_lines(&guard.unit, r)?;
        for item in extras {
            let line = LineItem::new(item.kind, item.description, item.quantity, item.unit_price)
                .ok_or(AMOUNT_OVERFLOW)?;
            lines.push(line);
        }
        let tax_rate = self.settings.tax_rate;
        let (subtotal, tax, total) = totals(&lines, discount, tax_rate)?;
        if discount > subtotal {
            return Err(EngineError::validation("discount exceeds subtotal"));
        }

        let invoice = Invoice {
            id,
            reservation_id,
            unit_id,
            lines,
            subtotal,
            discount,
            tax_rate,
            tax,
            total,
            amount_paid: Money::zero(),
            payments: Vec::new(),
            status: if draft {
                InvoiceStatus::Draft
            } else {
                InvoiceStatus::Issued
            },
            created_at: self.clock.now_ms(),
        };
        let event = Event::InvoiceCreated {
            invoice: invoice.clone(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(invoice)
    }

    pub async fn issue_invoice(&self, id: Ulid) -> Result<Invoice, EngineError> {
        let (unit_id, mut guard) = self.resolve_entity_write(&id).await?;
        let inv = find_invoice(&guard, &id)?;
        if inv.status != InvoiceStatus::Draft {
            return Err(invalid_transition("invoice", id, inv.status.as_str(), "issue"));
        }
        let event = Event::InvoiceIssued { id, unit_id };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(find_invoice(&guard, &id)?.clone())
    }

    /// Add a payment; status follows from the new balance.
    pub async fn record_payment(&self, invoice_id: Ulid, amount: Money) -> Result<Invoice, EngineError> {
        if !amount.is_positive() {
            return Err(EngineError::validation("payment amount must be positive"));
        }
        let (unit_id, mut guard) = self.resolve_entity_write(&invoice_id).await?;
        let inv = find_invoice(&guard, &invoice_id)?;
        if !inv.status.accepts_payment() {
            return Err(invalid_transition("invoice", invoice_id, inv.status.as_str(), "record payment on"));
        }
        if inv.amount_paid.checked_add(amount).is_none() {
            return Err(AMOUNT_OVERFLOW);
        }
        let event = Event::PaymentRecorded {
            invoice_id,
            unit_id,
            amount,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(find_invoice(&guard, &invoice_id)?.clone())
    }

    /// Void an invoice nothing has been paid against.
    pub async fn cancel_invoice(&self, id: Ulid) -> Result<Invoice, EngineError> {
        let (unit_id, mut guard) = self.resolve_entity_write(&id).await?;
        let inv = find_invoice(&guard, &id)?;
        let cancellable = matches!(inv.status, InvoiceStatus::Draft | InvoiceStatus::Issued)
            && inv.amount_paid.is_zero();
        if !cancellable {
            return Err(invalid_transition("invoice", id, inv.status.as_str(), "cancel"));
        }
        let event = Event::InvoiceCancelled { id, unit_id };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(find_invoice(&guard, &id)?.clone())
    }
}
