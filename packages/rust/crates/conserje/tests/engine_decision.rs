#![allow(missing_docs)]

use conserje::Decision;

#[test]
fn full_decision_parses() -> anyhow::Result<()> {
    let decision = Decision::parse(
        r#"{
            "reply": "Con gusto, la suite queda reservada.",
            "fact_updates": {"room_type": "suite", "guests": 2},
            "payment_confirmed": true
        }"#,
    )?;

    assert_eq!(decision.reply, "Con gusto, la suite queda reservada.");
    assert_eq!(
        decision.fact_updates.get("room_type").map(String::as_str),
        Some("suite")
    );
    assert_eq!(
        decision.fact_updates.get("guests").map(String::as_str),
        Some("2")
    );
    assert!(decision.payment_confirmed);
    Ok(())
}

#[test]
fn legacy_field_names_are_accepted() -> anyhow::Result<()> {
    let decision = Decision::parse(
        r#"{"reply": "ok", "facts": {"city": "Madrid"}, "paymentConfirmed": true}"#,
    )?;

    assert_eq!(
        decision.fact_updates.get("city").map(String::as_str),
        Some("Madrid")
    );
    assert!(decision.payment_confirmed);
    Ok(())
}

#[test]
fn absent_fields_default_to_empty() -> anyhow::Result<()> {
    let decision = Decision::parse(r#"{"reply": "ok"}"#)?;

    assert!(decision.fact_updates.is_empty());
    assert!(!decision.payment_confirmed);
    Ok(())
}

#[test]
fn scalar_fact_values_coerce_to_strings() -> anyhow::Result<()> {
    let decision = Decision::parse(
        r#"{
            "reply": "ok",
            "fact_updates": {"guests": 3, "deposit": 99.5, "late_checkout": true}
        }"#,
    )?;

    assert_eq!(
        decision.fact_updates.get("guests").map(String::as_str),
        Some("3")
    );
    assert_eq!(
        decision.fact_updates.get("deposit").map(String::as_str),
        Some("99.5")
    );
    assert_eq!(
        decision.fact_updates.get("late_checkout").map(String::as_str),
        Some("true")
    );
    Ok(())
}

#[test]
fn structured_fact_values_are_stringified() -> anyhow::Result<()> {
    let decision = Decision::parse(
        r#"{"reply": "ok", "fact_updates": {"stay": ["2026-09-01","2026-09-05"]}}"#,
    )?;

    assert_eq!(
        decision.fact_updates.get("stay").map(String::as_str),
        Some(r#"["2026-09-01","2026-09-05"]"#)
    );
    Ok(())
}

#[test]
fn null_and_blank_fact_values_are_dropped() -> anyhow::Result<()> {
    let decision = Decision::parse(
        r#"{
            "reply": "ok",
            "fact_updates": {"a": null, "b": "", "c": "   ", "room_type": "doble"}
        }"#,
    )?;

    assert_eq!(decision.fact_updates.len(), 1);
    assert_eq!(
        decision.fact_updates.get("room_type").map(String::as_str),
        Some("doble")
    );
    Ok(())
}

#[test]
fn reply_is_trimmed() -> anyhow::Result<()> {
    let decision = Decision::parse(r#"{"reply": "  Hola  "}"#)?;

    assert_eq!(decision.reply, "Hola");
    Ok(())
}

#[test]
fn whitespace_wrapped_json_parses() -> anyhow::Result<()> {
    let decision = Decision::parse("\n   {\"reply\": \"ok\"}   \n")?;

    assert_eq!(decision.reply, "ok");
    Ok(())
}

#[test]
fn missing_reply_is_an_error() -> anyhow::Result<()> {
    let error = match Decision::parse(r#"{"fact_updates": {"room_type": "suite"}}"#) {
        Ok(decision) => anyhow::bail!("unexpected decision: {decision:?}"),
        Err(error) => error,
    };

    assert!(error.to_string().contains("reply is missing or empty"));
    Ok(())
}

#[test]
fn blank_reply_is_an_error() {
    assert!(Decision::parse(r#"{"reply": "   "}"#).is_err());
    assert!(Decision::parse(r#"{"reply": ""}"#).is_err());
}

#[test]
fn non_json_content_is_an_error() -> anyhow::Result<()> {
    let error = match Decision::parse("lo siento, no puedo responder en JSON") {
        Ok(decision) => anyhow::bail!("unexpected decision: {decision:?}"),
        Err(error) => error,
    };

    assert!(error.to_string().contains("not valid JSON"));
    Ok(())
}
