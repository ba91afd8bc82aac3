use rust_fsm::*;

use super::email_reply::ReplyStep;
use super::engine::{Signal, Transition};
use super::payment_link::PaymentStep;
use super::schedule::ScheduleStep;

state_machine! {
    reply_flow(SelectEmail)

    SelectEmail(HydrateDraftResponse) => DraftResponse,
    SelectEmail(HydrateConfirmSend) => ConfirmSend,

    SelectEmail(Picked) => DraftResponse,
    SelectEmail(Unrecognized) => SelectEmail,

    DraftResponse(Drafted) => ConfirmSend,
    DraftResponse(Blank) => DraftResponse,

    ConfirmSend(Affirm) => Sent,
    ConfirmSend(Deny) => DraftResponse,
    ConfirmSend(Unrecognized) => ConfirmSend
}

state_machine! {
    schedule_flow(CollectStart)

    CollectStart(HydrateConfirmSchedule) => ConfirmSchedule,

    CollectStart(Parsed) => ConfirmSchedule,
    CollectStart(Blank) => CollectStart,
    CollectStart(Unrecognized) => CollectStart,

    ConfirmSchedule(Affirm) => Scheduled,
    ConfirmSchedule(Deny) => Cancelled,
    ConfirmSchedule(Unrecognized) => ConfirmSchedule
}

state_machine! {
    payment_flow(CollectAmount)

    CollectAmount(HydrateCollectDescription) => CollectDescription,
    CollectAmount(HydrateConfirmLink) => ConfirmLink,

    CollectAmount(Priced) => CollectDescription,
    CollectAmount(Blank) => CollectAmount,
    CollectAmount(Unrecognized) => CollectAmount,

    CollectDescription(Described) => ConfirmLink,
    CollectDescription(Blank) => CollectDescription,

    ConfirmLink(Affirm) => Created,
    ConfirmLink(Deny) => Cancelled,
    ConfirmLink(Unrecognized) => ConfirmLink
}

fn hydrate_reply(machine: &mut reply_flow::StateMachine, step: ReplyStep) -> Result<(), ()> {
    let input = match step {
        ReplyStep::SelectEmail => return Ok(()),
        ReplyStep::DraftResponse => reply_flow::Input::HydrateDraftResponse,
        ReplyStep::ConfirmSend => reply_flow::Input::HydrateConfirmSend,
    };
    machine.consume(&input).map_err(|_| ())?;
    Ok(())
}

fn expected_reply(step: ReplyStep, signal: Signal) -> Option<Transition<ReplyStep>> {
    match (step, signal) {
        (ReplyStep::SelectEmail, Signal::Pick) => {
            Some(Transition::Goto(ReplyStep::DraftResponse))
        }
        (ReplyStep::SelectEmail, Signal::Unrecognized) => Some(Transition::Stay),
        (ReplyStep::DraftResponse, Signal::Content) => {
            Some(Transition::Goto(ReplyStep::ConfirmSend))
        }
        (ReplyStep::DraftResponse, Signal::Blank) => Some(Transition::Stay),
        (ReplyStep::ConfirmSend, Signal::Affirm) => Some(Transition::Done),
        (ReplyStep::ConfirmSend, Signal::Deny) => {
            Some(Transition::Goto(ReplyStep::DraftResponse))
        }
        (ReplyStep::ConfirmSend, Signal::Unrecognized) => Some(Transition::Stay),
        _ => None,
    }
}

pub fn reply_transition(step: ReplyStep, signal: Signal) -> Option<Transition<ReplyStep>> {
    let mut machine = reply_flow::StateMachine::new();
    hydrate_reply(&mut machine, step).ok()?;

    let input = match signal {
        Signal::Pick => reply_flow::Input::Picked,
        Signal::Content => reply_flow::Input::Drafted,
        Signal::Blank => reply_flow::Input::Blank,
        Signal::Affirm => reply_flow::Input::Affirm,
        Signal::Deny => reply_flow::Input::Deny,
        Signal::Unrecognized => reply_flow::Input::Unrecognized,
        Signal::Time | Signal::Amount => return None,
    };

    machine.consume(&input).ok()?;
    expected_reply(step, signal)
}

fn hydrate_schedule(
    machine: &mut schedule_flow::StateMachine,
    step: ScheduleStep,
) -> Result<(), ()> {
    let input = match step {
        ScheduleStep::CollectStart => return Ok(()),
        ScheduleStep::ConfirmSchedule => schedule_flow::Input::HydrateConfirmSchedule,
    };
    machine.consume(&input).map_err(|_| ())?;
    Ok(())
}

fn expected_schedule(step: ScheduleStep, signal: Signal) -> Option<Transition<ScheduleStep>> {
    match (step, signal) {
        (ScheduleStep::CollectStart, Signal::Time) => {
            Some(Transition::Goto(ScheduleStep::ConfirmSchedule))
        }
        (ScheduleStep::CollectStart, Signal::Blank) => Some(Transition::Stay),
        (ScheduleStep::CollectStart, Signal::Unrecognized) => Some(Transition::Stay),
        (ScheduleStep::ConfirmSchedule, Signal::Affirm) => Some(Transition::Done),
        (ScheduleStep::ConfirmSchedule, Signal::Deny) => Some(Transition::Cancelled),
        (ScheduleStep::ConfirmSchedule, Signal::Unrecognized) => Some(Transition::Stay),
        _ => None,
    }
}

pub fn schedule_transition(
    step: ScheduleStep,
    signal: Signal,
) -> Option<Transition<ScheduleStep>> {
    let mut machine = schedule_flow::StateMachine::new();
    hydrate_schedule(&mut machine, step).ok()?;

    let input = match signal {
        Signal::Time => schedule_flow::Input::Parsed,
        Signal::Blank => schedule_flow::Input::Blank,
        Signal::Affirm => schedule_flow::Input::Affirm,
        Signal::Deny => schedule_flow::Input::Deny,
        Signal::Unrecognized => schedule_flow::Input::Unrecognized,
        Signal::Pick | Signal::Content | Signal::Amount => return None,
    };

    machine.consume(&input).ok()?;
    expected_schedule(step, signal)
}

fn hydrate_payment(machine: &mut payment_flow::StateMachine, step: PaymentStep) -> Result<(), ()> {
    let input = match step {
        PaymentStep::CollectAmount => return Ok(()),
        PaymentStep::CollectDescription => payment_flow::Input::HydrateCollectDescription,
        PaymentStep::ConfirmLink => payment_flow::Input::HydrateConfirmLink,
    };
    machine.consume(&input).map_err(|_| ())?;
    Ok(())
}

fn expected_payment(step: PaymentStep, signal: Signal) -> Option<Transition<PaymentStep>> {
    match (step, signal) {
        (PaymentStep::CollectAmount, Signal::Amount) => {
            Some(Transition::Goto(PaymentStep::CollectDescription))
        }
        (PaymentStep::CollectAmount, Signal::Blank) => Some(Transition::Stay),
        (PaymentStep::CollectAmount, Signal::Unrecognized) => Some(Transition::Stay),
        (PaymentStep::CollectDescription, Signal::Content) => {
            Some(Transition::Goto(PaymentStep::ConfirmLink))
        }
        (PaymentStep::CollectDescription, Signal::Blank) => Some(Transition::Stay),
        (PaymentStep::ConfirmLink, Signal::Affirm) => Some(Transition::Done),
        (PaymentStep::ConfirmLink, Signal::Deny) => Some(Transition::Cancelled),
        (PaymentStep::ConfirmLink, Signal::Unrecognized) => Some(Transition::Stay),
        _ => None,
    }
}

pub fn payment_transition(step: PaymentStep, signal: Signal) -> Option<Transition<PaymentStep>> {
    let mut machine = payment_flow::StateMachine::new();
    hydrate_payment(&mut machine, step).ok()?;

    let input = match signal {
        Signal::Amount => payment_flow::Input::Priced,
        Signal::Content => payment_flow::Input::Described,
        Signal::Blank => payment_flow::Input::Blank,
        Signal::Affirm => payment_flow::Input::Affirm,
        Signal::Deny => payment_flow::Input::Deny,
        Signal::Unrecognized => payment_flow::Input::Unrecognized,
        Signal::Pick | Signal::Time => return None,
    };

    machine.consume(&input).ok()?;
    expected_payment(step, signal)
}
