//! Setup, evaluation and variable access through `Problem`.

use mdao_core::parallel::{ActivityMask, Comm};
use mdao_core::{
    Component, ConfigurationError, Error, Group, LeafModel, LookupError, Problem, Result, VecView, VecViewMut,
};
use rstest::rstest;
use serde_json::json;

/// y = 2x
#[derive(Debug)]
struct Double;

impl LeafModel for Double {
    fn solve_nonlinear(&self, p: &VecView, u: &mut VecViewMut, _r: &mut VecViewMut) -> Result<()> {
        u.set_scalar("y", 2.0 * p.scalar("x")?)?;
        Ok(())
    }
}

fn double() -> Component {
    Component::new(Double).with_param("x", 0.0).with_output("y", 0.0)
}

/// Reads a pass-by-object setting and scales its input by it.
#[derive(Debug)]
struct Configured;

impl LeafModel for Configured {
    fn solve_nonlinear(&self, p: &VecView, u: &mut VecViewMut, _r: &mut VecViewMut) -> Result<()> {
        let gain = p.object("cfg")?.get("gain").and_then(|g| g.as_f64()).unwrap_or(1.0);
        u.set_scalar("y", gain * p.scalar("x")?)?;
        Ok(())
    }
}

fn chain() -> Group {
    let mut root = Group::new();
    root.add("a", Component::indep_var("x", 3.0), &[]).unwrap();
    root.add("b", double(), &[]).unwrap();
    root.connect("a:x", "b:x");
    root
}

#[test_log::test]
fn test_run_feeds_values_forward() {
    let mut prob = Problem::new(chain());
    prob.setup().unwrap();
    prob.run().unwrap();
    assert_eq!(prob.get("b:y").unwrap(), &[6.0]);
    assert_eq!(prob.get_in("b:x", "params").unwrap(), &[3.0]);

    prob.set("a:x", &[5.0]).unwrap();
    prob.run().unwrap();
    assert_eq!(prob.get("b:y").unwrap(), &[10.0]);
}

#[test]
fn test_residuals_vanish_at_solution() {
    let mut prob = Problem::new(chain());
    prob.setup().unwrap();
    prob.run().unwrap();
    prob.apply_nonlinear().unwrap();
    assert_eq!(prob.get_in("b:y", "resids").unwrap(), &[0.0]);

    prob.set("b:y", &[7.0]).unwrap();
    prob.apply_nonlinear().unwrap();
    assert_eq!(prob.get_in("b:y", "resids").unwrap(), &[1.0]);
}

#[test]
fn test_named_vectors_are_writable() {
    let mut prob = Problem::new(chain());
    prob.setup().unwrap();
    prob.set_in("a:x", "dunknowns", &[0.25]).unwrap();
    prob.set_in("b:x", "dparams", &[4.0]).unwrap();
    assert_eq!(prob.get_in("a:x", "dunknowns").unwrap(), &[0.25]);
    assert_eq!(prob.vectors().unwrap().dparams.get("b:x").unwrap(), &[4.0]);
    // Values are untouched.
    assert_eq!(prob.get("a:x").unwrap(), &[3.0]);
}

#[test]
fn test_access_before_setup_fails() {
    let mut prob = Problem::new(chain());
    assert!(!prob.is_setup());
    assert_eq!(prob.get("b:y").unwrap_err(), Error::from(ConfigurationError::NotSetUp));
    assert_eq!(prob.run().unwrap_err(), Error::from(ConfigurationError::NotSetUp));
    assert!(prob.calc_gradient(&["a:x"], &["b:y"], None).is_err());
}

#[rstest]
#[case("b:y", "bogus", Error::from(LookupError::UnknownVector("bogus".into())))]
#[case(
    "b:nope",
    "unknowns",
    Error::from(LookupError::UnknownVariable { name: "b:nope".into(), vector: "unknowns".into(), system: String::new() })
)]
fn test_lookup_errors(#[case] name: &str, #[case] vector: &str, #[case] expected: Error) {
    let mut prob = Problem::new(chain());
    prob.setup().unwrap();
    assert_eq!(prob.get_in(name, vector).unwrap_err(), expected);
}

#[test]
fn test_ambiguous_promotion_rejected() {
    let mut root = Group::new();
    root.add("a1", Component::indep_var("x", 1.0), &["x"]).unwrap();
    root.add("a2", Component::indep_var("x", 2.0), &["x"]).unwrap();
    root.add("b", double(), &["x"]).unwrap();
    let mut prob = Problem::new(root);

    match prob.setup().unwrap_err() {
        Error::Configuration(ConfigurationError::AmbiguousPromotion { name, candidates }) => {
            assert_eq!(name, "x");
            assert_eq!(candidates, vec!["a1:x".to_string(), "a2:x".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!prob.is_setup());
}

#[test]
fn test_unresolved_link_rejected() {
    let mut root = chain();
    root.connect("a:missing", "b:x");
    let err = Problem::new(root).setup().unwrap_err();
    assert!(matches!(err, Error::Configuration(ConfigurationError::Unresolved { .. })));
}

#[test]
fn test_size_mismatch_rejected() {
    let mut root = Group::new();
    root.add("a", Component::indep_var("x", vec![1.0, 2.0]), &[]).unwrap();
    root.add("b", double(), &[]).unwrap();
    root.connect("a:x", "b:x");
    let err = Problem::new(root).setup().unwrap_err();
    assert!(matches!(err, Error::Configuration(ConfigurationError::IncompatibleConnection { .. })));
}

#[test]
fn test_inactive_subtree_is_skipped() {
    let mut sub = Group::new();
    sub.add("c", double(), &["x"]).unwrap();
    let mut root = Group::new();
    root.add("a", Component::indep_var("x", 4.0), &["x"]).unwrap();
    root.add("b", double(), &["x"]).unwrap();
    root.add("far", sub, &["x"]).unwrap();

    let mask = ActivityMask::new(Comm { rank: 0, size: 2 }).deactivate("far");
    let mut prob = Problem::new(root).with_activity(mask);
    prob.setup().unwrap();
    prob.run().unwrap();

    assert_eq!(prob.get("b:y").unwrap(), &[8.0]);
    assert_eq!(prob.get("far:c:y").unwrap(), &[0.0]);
    assert!(!prob.root().subgroups().next().unwrap().is_active());
    assert!(!prob.unknowns_dict().unwrap().get("far:c:y").unwrap().local);
}

#[test_log::test]
fn test_objects_travel_with_values() {
    let mut root = Group::new();
    root.add("settings", Component::indep_var("cfg", json!({"gain": 5.0})), &["cfg"]).unwrap();
    root.add("a", Component::indep_var("x", 2.0), &["x"]).unwrap();
    let unit = Component::new(Configured).with_param("cfg", json!(null)).with_param("x", 0.0).with_output("y", 0.0);
    root.add("b", unit, &["cfg", "x"]).unwrap();

    let mut prob = Problem::new(root);
    prob.setup().unwrap();
    prob.run().unwrap();
    assert_eq!(prob.get("b:y").unwrap(), &[10.0]);

    prob.set_object("settings:cfg", json!({"gain": 0.5})).unwrap();
    prob.run().unwrap();
    assert_eq!(prob.get("b:y").unwrap(), &[1.0]);
    assert_eq!(prob.get_object("cfg").unwrap(), &json!({"gain": 0.5}));

    // Objects never enter the derivative system.
    let jac = prob.calc_gradient(&["x"], &["b:y"], None).unwrap();
    assert!((jac[(0, 0)] - 0.5).abs() < 1e-5);
}

#[test]
fn test_dump_lists_connections() {
    let mut prob = Problem::new(chain());
    prob.setup().unwrap();
    prob.run().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.txt");
    prob.dump_to(&path, false).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();

    assert!(text.starts_with("MODEL DUMP (values)"));
    assert!(text.contains("a:x -> b:x"));
    assert!(text.contains("b:y unknowns[1..2] = [6.0]"));

    let deriv = prob.dump(true).unwrap();
    assert!(deriv.starts_with("MODEL DUMP (derivatives)"));
}
