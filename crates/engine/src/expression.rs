//! Expression wiring: pure evaluation over a snapshot of inputs, and
//! discovery of the live streams feeding a formula.
//!
//! A formula becomes a stream by combining the latest value of every
//! source it references and re-evaluating on each change. Reactive
//! modifier nodes (distinct, debounce, on) become their own labelled
//! sub-streams: discovery stops at them and evaluation reads the modified
//! stream through its label.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use aquahub_domain::emit::{Emit, ObservableEmit};
use aquahub_domain::expr::{BinaryOp, Expr, UnaryOp};
use aquahub_domain::units::UnitTable;
use aquahub_rx::Rx;

use crate::registry::Registry;

static DISTINCT_SEQ: AtomicUsize = AtomicUsize::new(0);
static DEBOUNCE_SEQ: AtomicUsize = AtomicUsize::new(0);
static ON_SEQ: AtomicUsize = AtomicUsize::new(0);

fn next_label(kind: &str, seq: &AtomicUsize) -> String {
    format!("{kind}{}", seq.fetch_add(1, Ordering::Relaxed) + 1)
}

/// Near-equality for emits: enum values compare exactly, numeric values
/// within a small epsilon.
#[must_use]
pub fn emits_alike(a: &Emit, b: &Emit) -> bool {
    emits_within(a, b, 1e-4)
}

/// Near-equality with a caller-chosen numeric epsilon.
#[must_use]
pub fn emits_within(a: &Emit, b: &Emit, epsilon: f64) -> bool {
    if a.enum_value.is_some() || b.enum_value.is_some() {
        a.enum_value == b.enum_value
    } else {
        match (a.value, b.value) {
            (Some(x), Some(y)) => (x - y).abs() < epsilon,
            (None, None) => true,
            _ => false,
        }
    }
}

/// Qualify an observable reference relative to the referencing device.
#[must_use]
pub fn qualify(reference: &str, device_id: &str) -> String {
    if reference.contains(':') {
        reference.to_string()
    } else {
        format!("{device_id}:{reference}")
    }
}

fn bool_emit(value: bool) -> Emit {
    Emit::value(if value { 1.0 } else { 0.0 })
}

fn input(inputs: &HashMap<String, Emit>, key: &str) -> Emit {
    inputs
        .get(key)
        .cloned()
        .unwrap_or_else(|| Emit::note(format!("missing input {key}")))
}

/// Evaluate a formula over a snapshot of its inputs.
///
/// Inputs are keyed by reference text for observable references and by
/// label for modifier nodes. Evaluation never fails: bad arithmetic and
/// unresolved inputs produce empty emits carrying a diagnostic note.
#[must_use]
pub fn evaluate(expr: &Expr, inputs: &HashMap<String, Emit>, units: &UnitTable) -> Emit {
    match expr {
        Expr::Value { value } => Emit::value(*value),
        Expr::EnumValue { value } => Emit::enum_value(value.clone()),
        Expr::None => Emit::default(),
        Expr::Observable { id } => input(inputs, id),
        Expr::Distinct { expr, label } | Expr::Debounce { expr, label, .. } => match label.get() {
            Some(label) => input(inputs, label),
            None => evaluate(expr, inputs, units),
        },
        Expr::On { then, label, .. } => match label.get() {
            Some(label) => input(inputs, label),
            None => evaluate(then, inputs, units),
        },
        Expr::Unary { op, expr } => {
            let operand = evaluate(expr, inputs, units);
            match op {
                UnaryOp::Negate => operand
                    .value
                    .map_or_else(Emit::default, |value| Emit::value(-value)),
                UnaryOp::Not => bool_emit(!operand.truthy()),
            }
        }
        Expr::Binary { left, op, right } => {
            let left = evaluate(left, inputs, units);
            let right = evaluate(right, inputs, units);
            binary(&left, *op, &right)
        }
        Expr::Convert {
            expr,
            quantity,
            from_unit,
            to_unit,
        } => {
            let operand = evaluate(expr, inputs, units);
            match operand.value {
                Some(value) => match units.convert(value, quantity, from_unit, to_unit) {
                    Ok(converted) => Emit::value(converted),
                    Err(error) => Emit::note(error.to_string()),
                },
                None => operand,
            }
        }
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            if evaluate(cond, inputs, units).truthy() {
                evaluate(then, inputs, units)
            } else {
                otherwise
                    .as_ref()
                    .map_or_else(Emit::default, |e| evaluate(e, inputs, units))
            }
        }
        Expr::When { cases, otherwise } => {
            for case in cases {
                if evaluate(&case.cond, inputs, units).truthy() {
                    return evaluate(&case.then, inputs, units);
                }
            }
            otherwise
                .as_ref()
                .map_or_else(Emit::default, |e| evaluate(e, inputs, units))
        }
    }
}

fn binary(left: &Emit, op: BinaryOp, right: &Emit) -> Emit {
    match op {
        BinaryOp::And => bool_emit(left.truthy() && right.truthy()),
        BinaryOp::Or => bool_emit(left.truthy() || right.truthy()),
        BinaryOp::Xor => bool_emit(left.truthy() ^ right.truthy()),
        BinaryOp::Eq => bool_emit(emits_equal(left, right)),
        BinaryOp::Ne => bool_emit(!emits_equal(left, right)),
        BinaryOp::Gt => ordering(left, right, |o| o == std::cmp::Ordering::Greater),
        BinaryOp::Ge => ordering(left, right, |o| o != std::cmp::Ordering::Less),
        BinaryOp::Lt => ordering(left, right, |o| o == std::cmp::Ordering::Less),
        BinaryOp::Le => ordering(left, right, |o| o != std::cmp::Ordering::Greater),
        BinaryOp::Add => arithmetic(left, right, |a, b| a + b),
        BinaryOp::Subtract => arithmetic(left, right, |a, b| a - b),
        BinaryOp::Multiply => arithmetic(left, right, |a, b| a * b),
        BinaryOp::Divide => match (left.value, right.value) {
            (Some(_), Some(divisor)) if divisor == 0.0 => Emit::note("division by zero"),
            (Some(a), Some(b)) => Emit::value(a / b),
            _ => Emit::default(),
        },
    }
}

fn emits_equal(left: &Emit, right: &Emit) -> bool {
    if left.value.is_some() || right.value.is_some() {
        left.value == right.value
    } else {
        left.enum_value == right.enum_value
    }
}

fn ordering(left: &Emit, right: &Emit, accept: impl Fn(std::cmp::Ordering) -> bool) -> Emit {
    let compared = match (left.value, right.value) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (&left.enum_value, &right.enum_value) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };
    compared.map_or_else(|| Emit::value(0.0), |o| bool_emit(accept(o)))
}

fn arithmetic(left: &Emit, right: &Emit, apply: impl Fn(f64, f64) -> f64) -> Emit {
    match (left.value, right.value) {
        (Some(a), Some(b)) => Emit::value(apply(a, b)),
        _ => Emit::default(),
    }
}

fn observable_stream(registry: &Arc<Registry>, reference: &str, device_id: &str) -> Rx<Emit> {
    let qualified = qualify(reference, device_id);
    let registry: Weak<Registry> = Arc::downgrade(registry);
    Rx::defer(move || {
        let resolved = registry
            .upgrade()
            .and_then(|r| r.get_rx_observable(&qualified).ok());
        match resolved {
            Some(rx) => rx.map(|emit: ObservableEmit| emit.raw()),
            None => {
                tracing::error!(id = %qualified, "could not resolve observable reference");
                Rx::constant(Emit::note(format!("could not find observable {qualified}")))
            }
        }
    })
}

/// Find the live streams feeding a formula, as `(input key, stream)`
/// pairs. Observable references are keyed by their reference text;
/// modifier nodes get a process-unique label assigned on first discovery
/// and keep it across pipeline rebuilds.
pub fn discover_sources(
    registry: &Arc<Registry>,
    expr: &Expr,
    device_id: &str,
) -> Vec<(String, Rx<Emit>)> {
    let mut sources = Vec::new();
    walk(registry, expr, device_id, &mut sources);
    sources
}

fn push_unique(sources: &mut Vec<(String, Rx<Emit>)>, key: String, stream: Rx<Emit>) {
    if !sources.iter().any(|(existing, _)| *existing == key) {
        sources.push((key, stream));
    }
}

fn walk(
    registry: &Arc<Registry>,
    expr: &Expr,
    device_id: &str,
    sources: &mut Vec<(String, Rx<Emit>)>,
) {
    match expr {
        Expr::Observable { id } => {
            push_unique(sources, id.clone(), observable_stream(registry, id, device_id));
        }
        Expr::Distinct { expr: inner, label } => {
            let label = label
                .get_or_assign(|| next_label("distinct", &DISTINCT_SEQ))
                .to_string();
            let stream =
                as_observable(registry, inner, device_id).distinct_until_changed_by(emits_alike);
            push_unique(sources, label, stream);
        }
        Expr::Debounce {
            seconds,
            expr: inner,
            label,
        } => {
            let label = label
                .get_or_assign(|| next_label("debounce", &DEBOUNCE_SEQ))
                .to_string();
            let stream = as_observable(registry, inner, device_id).debounce(*seconds);
            push_unique(sources, label, stream);
        }
        Expr::On {
            sample_on,
            then,
            label,
        } => {
            let label = label
                .get_or_assign(|| next_label("on", &ON_SEQ))
                .to_string();
            let stream = as_observable(registry, then, device_id)
                .sample(&as_observable(registry, sample_on, device_id));
            push_unique(sources, label, stream);
        }
        Expr::Unary { expr, .. } | Expr::Convert { expr, .. } => {
            walk(registry, expr, device_id, sources);
        }
        Expr::Binary { left, right, .. } => {
            walk(registry, left, device_id, sources);
            walk(registry, right, device_id, sources);
        }
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            walk(registry, cond, device_id, sources);
            walk(registry, then, device_id, sources);
            if let Some(otherwise) = otherwise {
                walk(registry, otherwise, device_id, sources);
            }
        }
        Expr::When { cases, otherwise } => {
            for case in cases {
                walk(registry, &case.cond, device_id, sources);
                walk(registry, &case.then, device_id, sources);
            }
            if let Some(otherwise) = otherwise {
                walk(registry, otherwise, device_id, sources);
            }
        }
        Expr::EnumValue { .. } | Expr::Value { .. } | Expr::None => {}
    }
}

/// Turn a formula into a live stream: combine the latest value of every
/// source and re-evaluate on each change. A formula without sources
/// becomes a single constant emission.
#[must_use]
pub fn as_observable(registry: &Arc<Registry>, expr: &Expr, device_id: &str) -> Rx<Emit> {
    let sources = discover_sources(registry, expr, device_id);
    let units = registry.units();
    if sources.is_empty() {
        return Rx::constant(evaluate(expr, &HashMap::new(), &units));
    }
    let (keys, streams): (Vec<String>, Vec<Rx<Emit>>) = sources.into_iter().unzip();
    let expr = expr.clone();
    Rx::combine_latest_all(streams).map(move |values| {
        let inputs: HashMap<String, Emit> = keys.iter().cloned().zip(values).collect();
        evaluate(&expr, &inputs, &units)
    })
}

#[cfg(test)]
mod tests {
    use aquahub_domain::expr::WhenCase;

    use super::*;

    fn eval(expr: &Expr) -> Emit {
        evaluate(expr, &HashMap::new(), &UnitTable::default())
    }

    fn eval_with(expr: &Expr, inputs: &[(&str, Emit)]) -> Emit {
        let inputs = inputs
            .iter()
            .map(|(key, emit)| ((*key).to_string(), emit.clone()))
            .collect();
        evaluate(expr, &inputs, &UnitTable::default())
    }

    #[test]
    fn should_evaluate_literals() {
        assert_eq!(eval(&Expr::value(2.5)), Emit::value(2.5));
        assert_eq!(eval(&Expr::enum_value("on")), Emit::enum_value("on"));
        assert!(eval(&Expr::None).is_empty());
    }

    #[test]
    fn should_evaluate_arithmetic() {
        let sum = Expr::binary(Expr::value(2.0), BinaryOp::Add, Expr::value(3.0));
        assert_eq!(eval(&sum), Emit::value(5.0));
        let product = Expr::binary(Expr::value(2.0), BinaryOp::Multiply, Expr::value(3.0));
        assert_eq!(eval(&product), Emit::value(6.0));
        let difference = Expr::binary(Expr::value(2.0), BinaryOp::Subtract, Expr::value(3.0));
        assert_eq!(eval(&difference), Emit::value(-1.0));
    }

    #[test]
    fn should_note_division_by_zero() {
        let division = Expr::binary(Expr::value(1.0), BinaryOp::Divide, Expr::value(0.0));
        let emit = eval(&division);
        assert!(emit.is_empty());
        assert_eq!(emit.note.as_deref(), Some("division by zero"));
    }

    #[test]
    fn should_propagate_missing_operands_as_empty() {
        let sum = Expr::binary(Expr::value(1.0), BinaryOp::Add, Expr::observable("A"));
        let emit = eval_with(&sum, &[("A", Emit::default())]);
        assert!(emit.is_empty());
    }

    #[test]
    fn should_compare_numeric_values() {
        let greater = Expr::binary(Expr::value(7.9), BinaryOp::Gt, Expr::value(7.8));
        assert!(eval(&greater).truthy());
        let less_equal = Expr::binary(Expr::value(7.9), BinaryOp::Le, Expr::value(7.8));
        assert!(!eval(&less_equal).truthy());
    }

    #[test]
    fn should_compare_enum_values_lexicographically() {
        let less = Expr::binary(
            Expr::enum_value("day"),
            BinaryOp::Lt,
            Expr::enum_value("night"),
        );
        assert!(eval(&less).truthy());
    }

    #[test]
    fn should_prefer_numeric_equality_when_any_side_is_numeric() {
        let equal = Expr::binary(Expr::value(1.0), BinaryOp::Eq, Expr::enum_value("1"));
        assert!(!eval(&equal).truthy());
        let equal = Expr::binary(
            Expr::enum_value("on"),
            BinaryOp::Eq,
            Expr::enum_value("on"),
        );
        assert!(eval(&equal).truthy());
    }

    #[test]
    fn should_evaluate_boolean_operators_on_truthiness() {
        let both = Expr::binary(Expr::value(1.0), BinaryOp::And, Expr::value(0.0));
        assert!(!eval(&both).truthy());
        let either = Expr::binary(Expr::value(1.0), BinaryOp::Or, Expr::value(0.0));
        assert!(eval(&either).truthy());
        let exclusive = Expr::binary(Expr::value(1.0), BinaryOp::Xor, Expr::value(1.0));
        assert!(!eval(&exclusive).truthy());
        let negated = Expr::unary(UnaryOp::Not, Expr::value(0.0));
        assert!(eval(&negated).truthy());
    }

    #[test]
    fn should_negate_values() {
        assert_eq!(
            eval(&Expr::unary(UnaryOp::Negate, Expr::value(2.0))),
            Emit::value(-2.0)
        );
        assert!(eval(&Expr::unary(UnaryOp::Negate, Expr::None)).is_empty());
    }

    #[test]
    fn should_pick_conditional_branches() {
        let expr = Expr::if_else(
            Expr::binary(Expr::observable("A"), BinaryOp::Gt, Expr::value(5.0)),
            Expr::enum_value("on"),
            Expr::enum_value("off"),
        );
        assert_eq!(
            eval_with(&expr, &[("A", Emit::value(6.0))]),
            Emit::enum_value("on")
        );
        assert_eq!(
            eval_with(&expr, &[("A", Emit::value(4.0))]),
            Emit::enum_value("off")
        );
    }

    #[test]
    fn should_pick_the_first_matching_when_case() {
        let expr = Expr::When {
            cases: vec![
                WhenCase {
                    cond: Expr::binary(Expr::observable("A"), BinaryOp::Gt, Expr::value(10.0)),
                    then: Expr::enum_value("high"),
                },
                WhenCase {
                    cond: Expr::binary(Expr::observable("A"), BinaryOp::Gt, Expr::value(5.0)),
                    then: Expr::enum_value("medium"),
                },
            ],
            otherwise: Some(Box::new(Expr::enum_value("low"))),
        };
        assert_eq!(
            eval_with(&expr, &[("A", Emit::value(12.0))]),
            Emit::enum_value("high")
        );
        assert_eq!(
            eval_with(&expr, &[("A", Emit::value(7.0))]),
            Emit::enum_value("medium")
        );
        assert_eq!(
            eval_with(&expr, &[("A", Emit::value(1.0))]),
            Emit::enum_value("low")
        );
    }

    #[test]
    fn should_note_unresolved_inputs() {
        let emit = eval(&Expr::observable("A"));
        assert!(emit.is_empty());
        assert_eq!(emit.note.as_deref(), Some("missing input A"));
    }

    #[test]
    fn should_convert_units_in_expressions() {
        use aquahub_domain::units::{QuantityType, Unit};
        let table = UnitTable::new(vec![QuantityType {
            id: "volume".to_string(),
            units: vec![
                Unit {
                    id: "l".to_string(),
                    rel_unit: None,
                    rel_times: None,
                    rel_add: None,
                },
                Unit {
                    id: "ml".to_string(),
                    rel_unit: Some("l".to_string()),
                    rel_times: Some(0.001),
                    rel_add: None,
                },
            ],
        }]);
        let expr = Expr::Convert {
            expr: Box::new(Expr::value(2.0)),
            quantity: "volume".to_string(),
            from_unit: "l".to_string(),
            to_unit: "ml".to_string(),
        };
        let emit = evaluate(&expr, &HashMap::new(), &table);
        assert_eq!(emit, Emit::value(2000.0));

        let bad = Expr::Convert {
            expr: Box::new(Expr::value(2.0)),
            quantity: "volume".to_string(),
            from_unit: "l".to_string(),
            to_unit: "gal".to_string(),
        };
        assert!(evaluate(&bad, &HashMap::new(), &table).note.is_some());
    }

    #[test]
    fn should_read_modifier_nodes_through_their_labels() {
        let expr = Expr::Distinct {
            expr: Box::new(Expr::observable("A")),
            label: aquahub_domain::expr::Label::default(),
        };
        if let Expr::Distinct { label, .. } = &expr {
            label.get_or_assign(|| "distinct_test".to_string());
        }
        let emit = eval_with(&expr, &[("distinct_test", Emit::value(3.0))]);
        assert_eq!(emit, Emit::value(3.0));
    }

    #[test]
    fn should_judge_emit_likeness_with_epsilon() {
        assert!(emits_alike(&Emit::value(1.0), &Emit::value(1.00001)));
        assert!(!emits_alike(&Emit::value(1.0), &Emit::value(1.1)));
        assert!(emits_alike(&Emit::enum_value("on"), &Emit::enum_value("on")));
        assert!(!emits_alike(&Emit::enum_value("on"), &Emit::value(1.0)));
        assert!(emits_alike(&Emit::default(), &Emit::default()));
    }

    #[test]
    fn should_qualify_local_references() {
        assert_eq!(qualify("temp", "1"), "1:temp");
        assert_eq!(qualify("2:temp", "1"), "2:temp");
        assert_eq!(qualify(">tank:temp<", "1"), ">tank:temp<");
    }
}
