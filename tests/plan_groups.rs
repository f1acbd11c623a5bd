use batch_warden::config::Units;
use batch_warden::plan::{parse_units_text, parse_units_toml, BatchPlan, UnitSpec};
use batch_warden::units::Locator;
use std::path::{Path, PathBuf};

fn file_of_size(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, vec![b'x'; size]).unwrap();
    path
}

fn spec(path: PathBuf, capability: Option<&str>) -> UnitSpec {
    UnitSpec {
        path: Some(path),
        capability: capability.map(str::to_string),
        ..UnitSpec::default()
    }
}

#[test]
fn text_units_take_tab_separated_associated_data() {
    let raw = "# models\n/a.rvt\tRow A\tx\n\n\tno path here\n/b.rvt\n";
    let specs = parse_units_text(raw);
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].path.as_deref(), Some(Path::new("/a.rvt")));
    assert_eq!(specs[0].associated_data, vec!["Row A".to_string(), "x".to_string()]);
    assert!(specs[1].associated_data.is_empty());
}

#[test]
fn toml_units_need_exactly_one_locator() {
    let ok = r#"
[[unit]]
path = "/a.rvt"
capability = "2019"
export_folder = "/exports/a"

[[unit]]
cloud = { project_id = "p", model_id = "m" }
"#;
    let specs = parse_units_toml(ok).unwrap();
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].capability.as_deref(), Some("2019"));
    assert!(specs[1].cloud.is_some());

    let both = r#"
[[unit]]
path = "/a.rvt"
cloud = { project_id = "p", model_id = "m" }
"#;
    assert!(parse_units_toml(both).is_err());
    assert!(parse_units_toml("[[unit]]\ncapability = \"x\"\n").is_err());
}

#[test]
fn plan_groups_by_capability_orders_by_size_and_numbers_globally() {
    let dir = tempfile::tempdir().unwrap();
    let big = file_of_size(dir.path(), "big.rvt", 300);
    let small = file_of_size(dir.path(), "small.rvt", 10);
    let mid = file_of_size(dir.path(), "mid.rvt", 100);
    let other = file_of_size(dir.path(), "other.rvt", 50);
    let missing = dir.path().join("missing.rvt");

    let specs = vec![
        spec(big.clone(), Some("2020")),
        spec(missing, None),
        spec(small.clone(), Some("2020")),
        spec(other.clone(), None),
        spec(mid.clone(), Some("2020")),
    ];
    let plan = BatchPlan::build(&Units::default(), "s-42", specs);

    assert_eq!(plan.skipped.len(), 1);
    assert_eq!(plan.total, 4);
    let caps: Vec<_> = plan.groups.iter().map(|g| g.capability.as_str()).collect();
    assert_eq!(caps, vec!["2020", "default"]);

    let g2020 = &plan.groups[0].units;
    assert_eq!(g2020.indices(), vec![1, 2, 3]);
    let paths: Vec<_> = g2020
        .units()
        .iter()
        .map(|u| match &u.locator {
            Locator::File { path } => path.clone(),
            Locator::Cloud { .. } => unreachable!(),
        })
        .collect();
    assert_eq!(paths, vec![small, mid, big]);
    assert!(g2020.units().iter().all(|u| u.progress_max == 4 && u.session_id == "s-42"));

    assert_eq!(plan.groups[1].units.indices(), vec![4]);
}

#[test]
fn export_folder_defines_the_completion_marker() {
    let dir = tempfile::tempdir().unwrap();
    let doc = file_of_size(dir.path(), "doc.rvt", 1);
    let specs = vec![
        UnitSpec {
            export_folder: Some(dir.path().join("out-a")),
            ..spec(doc.clone(), None)
        },
        spec(doc, None),
    ];
    let units = Units {
        order_by_size: false,
        ..Units::default()
    };
    let plan = BatchPlan::build(&units, "s", specs);
    let list = &plan.groups[0].units;
    assert_eq!(
        list.units()[0].completion_marker,
        Some(dir.path().join("out-a").join("snapshot.json"))
    );
    assert_eq!(list.units()[1].completion_marker, None);
    // One unit without a marker means the slice has no usable marker set.
    assert_eq!(list.completion_markers(), None);
    assert_eq!(list.from_index(1).take_front(1).completion_markers().map(|m| m.len()), Some(1));
}

#[test]
fn cloud_units_are_never_skipped() {
    let specs = parse_units_toml(
        "[[unit]]\ncloud = { project_id = \"p\", model_id = \"m\" }\ncapability = \"2021\"\n",
    )
    .unwrap();
    let plan = BatchPlan::build(&Units::default(), "s", specs);
    assert!(plan.skipped.is_empty());
    assert!(plan.groups[0].units.units()[0].locator.is_cloud());
}
