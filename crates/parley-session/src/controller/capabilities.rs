//! Execution of capabilities invoked by the conversation engine.
//!
//! Every handler returns the text the engine relays to the caller. Vendor
//! failures and timeouts become fallback messages; nothing is raised back to
//! the engine.

use super::CallController;
use crate::capability::CapabilityKind;
use crate::event::CapabilityCall;
use crate::matching::{available_labels, match_destination};
use parley_types::{
    BookingRequest, CollectedData, PortError, TransferDestination, TransferRequest, WebhookContext,
};
use std::future::Future;
use std::time::Duration;

/// Longest webhook response relayed to the engine, in characters.
const MAX_WEBHOOK_RESPONSE_CHARS: usize = 2_000;

const TRANSFER_FAILED: &str =
    "I'm having trouble transferring your call right now. Can I take a message instead?";

async fn within<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, PortError>>,
) -> Result<T, PortError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(PortError::Timeout(limit.as_millis() as u64)))
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

impl CallController {
    /// Runs a capability. The flag asks the controller to end the call after
    /// the reply has been delivered.
    pub(super) async fn invoke(&mut self, call: &CapabilityCall) -> (String, bool) {
        let room = self.session.room_name().to_string();
        let Some(kind) = self.capabilities.lookup(&call.name) else {
            tracing::warn!(room = %room, capability = %call.name, "unknown capability invoked");
            return ("I'm not able to do that on this call.".to_string(), false);
        };
        tracing::info!(room = %room, capability = %call.name, "capability invoked");

        let reply = match kind {
            CapabilityKind::EndCall => return ("Ending the call now. Goodbye!".to_string(), true),
            CapabilityKind::TransferCall => self.transfer_call(call).await,
            CapabilityKind::StartWarmTransfer => self.start_warm_transfer(call).await,
            CapabilityKind::CompleteWarmTransfer => self.complete_warm_transfer().await,
            CapabilityKind::CancelWarmTransfer => self.cancel_warm_transfer().await,
            CapabilityKind::SendSms => self.send_sms(call).await,
            CapabilityKind::CheckAvailability => self.check_availability(call).await,
            CapabilityKind::BookAppointment => self.book_appointment(call).await,
            CapabilityKind::CollectCallerData => self.collect_caller_data(call).await,
            CapabilityKind::Custom(index) => self.invoke_custom(index, call).await,
        };
        (reply, false)
    }

    fn find_destination(&self, call: &CapabilityCall) -> Result<TransferDestination, String> {
        let destinations = &self.config.transfer.destinations;
        let spoken = call
            .str_arg("target")
            .or_else(|| call.str_arg("transfer_to"))
            .unwrap_or_default();
        match_destination(spoken, destinations)
            .cloned()
            .ok_or_else(|| {
                format!(
                    "I don't have a transfer number configured for '{spoken}'. Available options are: {}",
                    available_labels(destinations)
                )
            })
    }

    fn transfer_request(&self, destination: &TransferDestination) -> TransferRequest {
        TransferRequest {
            room_name: self.session.room_name().to_string(),
            participant_identity: self.session.counterpart_identity().map(str::to_string),
            provider_call_id: self.session.provider_call_id().map(str::to_string),
            target_label: destination.label.clone(),
            destination: destination.phone_number.clone(),
            caller_id: destination
                .caller_id
                .clone()
                .or_else(|| self.session.service_number().map(str::to_string)),
            service_number: self.session.service_number().map(str::to_string),
        }
    }

    async fn transfer_call(&mut self, call: &CapabilityCall) -> String {
        if self.transfer.active {
            return "A transfer is already in progress.".to_string();
        }
        let destination = match self.find_destination(call) {
            Ok(d) => d,
            Err(message) => return message,
        };
        let request = self.transfer_request(&destination);
        match within(
            self.settings.vendor_timeout(),
            self.services.telephony.transfer_call(&request),
        )
        .await
        {
            Ok(()) => format!("Transferring you to {} now. Please hold...", destination.label),
            Err(e) => {
                tracing::warn!(room = %request.room_name, target = %destination.label, error = %e, "transfer failed");
                TRANSFER_FAILED.to_string()
            }
        }
    }

    async fn start_warm_transfer(&mut self, call: &CapabilityCall) -> String {
        if self.transfer.active {
            let target = self.transfer.target_label.as_deref().unwrap_or("them");
            return format!("I'm already connecting you with {target}. Please hold.");
        }
        let destination = match self.find_destination(call) {
            Ok(d) => d,
            Err(message) => return message,
        };
        let request = self.transfer_request(&destination);
        match within(
            self.settings.vendor_timeout(),
            self.services.telephony.start_warm_transfer(&request),
        )
        .await
        {
            Ok(()) => {
                self.transfer.active = true;
                self.transfer.target_label = Some(destination.label.clone());
                format!(
                    "Please hold for a moment while I reach {} and let them know about your call.",
                    destination.label
                )
            }
            Err(e) => {
                tracing::warn!(room = %request.room_name, target = %destination.label, error = %e, "warm transfer failed to start");
                TRANSFER_FAILED.to_string()
            }
        }
    }

    async fn complete_warm_transfer(&mut self) -> String {
        if !self.transfer.active {
            return "There is no active transfer to complete.".to_string();
        }
        let room = self.session.room_name().to_string();
        match within(
            self.settings.vendor_timeout(),
            self.services.telephony.complete_warm_transfer(&room),
        )
        .await
        {
            Ok(()) => {
                let target = self.transfer.target_label.take().unwrap_or_default();
                self.transfer.active = false;
                format!("Connecting you with {target} now.")
            }
            Err(e) => {
                tracing::warn!(room = %room, error = %e, "warm transfer failed to complete");
                "I wasn't able to connect the transfer. Would you like me to take a message instead?"
                    .to_string()
            }
        }
    }

    async fn cancel_warm_transfer(&mut self) -> String {
        if !self.transfer.active {
            return "There is no active transfer to cancel.".to_string();
        }
        let room = self.session.room_name().to_string();
        if let Err(e) = within(
            self.settings.vendor_timeout(),
            self.services.telephony.cancel_warm_transfer(&room),
        )
        .await
        {
            tracing::warn!(room = %room, error = %e, "warm transfer cancel failed");
        }
        self.transfer.active = false;
        self.transfer.target_label = None;
        "I've cancelled the transfer and I'm back with you. How else can I help?".to_string()
    }

    async fn send_sms(&mut self, call: &CapabilityCall) -> String {
        let Some(body) = call.str_arg("message") else {
            return "What would you like the text message to say?".to_string();
        };
        let Some(to) = self.session.counterpart_phone() else {
            return "I don't have a number to send a text message to.".to_string();
        };
        let Some(from) = self.config.sms.sender_number.as_deref() else {
            return "I'm not able to send text messages right now.".to_string();
        };
        match within(
            self.settings.vendor_timeout(),
            self.services.telephony.send_sms(from, to, body),
        )
        .await
        {
            Ok(()) => "I've sent you a text message.".to_string(),
            Err(e) => {
                tracing::warn!(room = %self.session.room_name(), error = %e, "sms failed");
                "I wasn't able to send the text message right now.".to_string()
            }
        }
    }

    async fn check_availability(&mut self, call: &CapabilityCall) -> String {
        let Some(credential) = self.preconditions.calendar_credential.as_deref() else {
            return "I can't check the calendar right now.".to_string();
        };
        let Some(date) = call.str_arg("date") else {
            return "Which date would you like me to check?".to_string();
        };
        match within(
            self.settings.vendor_timeout(),
            self.services.integrations.available_slots(
                credential,
                self.config.booking.event_type_id,
                date,
            ),
        )
        .await
        {
            Ok(slots) if slots.is_empty() => format!("There are no open times on {date}."),
            Ok(slots) => format!("Available times on {date}: {}.", slots.join(", ")),
            Err(e) => {
                tracing::warn!(room = %self.session.room_name(), error = %e, "availability check failed");
                "I'm having trouble checking the calendar right now.".to_string()
            }
        }
    }

    async fn book_appointment(&mut self, call: &CapabilityCall) -> String {
        let Some(credential) = self.preconditions.calendar_credential.as_deref() else {
            return "I can't book appointments right now.".to_string();
        };
        let (Some(start_time), Some(name)) = (call.str_arg("start_time"), call.str_arg("name"))
        else {
            return "I need a time and a name to book the appointment.".to_string();
        };
        let request = BookingRequest {
            event_type_id: self.config.booking.event_type_id,
            start_time: start_time.to_string(),
            name: name.to_string(),
            email: call.str_arg("email").map(str::to_string),
            phone: self.session.counterpart_phone().map(str::to_string),
            notes: call.str_arg("notes").map(str::to_string),
        };
        match within(
            self.settings.vendor_timeout(),
            self.services.integrations.book_appointment(credential, &request),
        )
        .await
        {
            Ok(confirmation) => format!(
                "You're booked for {}. Your confirmation number is {}.",
                confirmation.start_time, confirmation.booking_id
            ),
            Err(e) => {
                tracing::warn!(room = %self.session.room_name(), error = %e, "booking failed");
                "I wasn't able to book that time. Would you like to try a different time?"
                    .to_string()
            }
        }
    }

    async fn collect_caller_data(&mut self, call: &CapabilityCall) -> String {
        let (Some(data_type), Some(data_value)) =
            (call.str_arg("data_type"), call.str_arg("data_value"))
        else {
            return "I didn't catch that. Could you repeat it?".to_string();
        };
        let data = CollectedData {
            tenant_id: self.session.tenant_id().to_string(),
            call_record_id: self.session.call_record_id().map(str::to_string),
            room_name: self.session.room_name().to_string(),
            data_type: data_type.to_string(),
            data_value: data_value.to_string(),
            context: call.str_arg("context").unwrap_or_default().to_string(),
        };
        match within(
            self.settings.vendor_timeout(),
            self.services.store.record_collected_data(&data),
        )
        .await
        {
            Ok(()) => "I've noted that information. Thank you!".to_string(),
            Err(e) => {
                tracing::warn!(room = %data.room_name, data_type = %data.data_type, error = %e, "failed to record collected data");
                "I've noted that information.".to_string()
            }
        }
    }

    async fn invoke_custom(&mut self, index: usize, call: &CapabilityCall) -> String {
        let Some(function) = self.config.custom_functions.get(index) else {
            return "I'm not able to do that on this call.".to_string();
        };
        let context = WebhookContext {
            tenant_id: self.session.tenant_id().to_string(),
            room_name: self.session.room_name().to_string(),
            counterpart_phone: self.session.counterpart_phone().map(str::to_string),
            call_record_id: self.session.call_record_id().map(str::to_string),
        };
        match within(
            self.settings.vendor_timeout(),
            self.services
                .integrations
                .invoke_webhook(function, &call.arguments, &context),
        )
        .await
        {
            Ok(body) if body.trim().is_empty() => "Done.".to_string(),
            Ok(body) => truncate_chars(body.trim(), MAX_WEBHOOK_RESPONSE_CHARS),
            Err(e) => {
                tracing::warn!(room = %context.room_name, function = %function.name, error = %e, "custom function failed");
                "I wasn't able to complete that request right now.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_counts_characters() {
        let long = "é".repeat(2_500);
        assert_eq!(truncate_chars(&long, MAX_WEBHOOK_RESPONSE_CHARS).chars().count(), 2_000);
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_vendor_calls_time_out() {
        let result: Result<(), PortError> = within(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(PortError::Timeout(1_000)));
    }
}
