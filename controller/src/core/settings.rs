//! Flat `dotted.key = "text"` overrides merged into a TOML document.
//!
//! Used for `--set` style overrides on the command line. Array positions are
//! 1-based; an array named by any override is rebuilt from exactly the indices
//! given, so overrides can both change and shorten it. The indices must be
//! contiguous from 1.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow, bail};
use toml::{Table, Value};

#[derive(Debug)]
enum Override {
    Leaf(String),
    Branch(BTreeMap<String, Override>),
}

/// Merge `settings` into `base`, returning the merged document.
///
/// Override text is parsed as a bool, an integer or a float when it looks like one,
/// and kept as a string otherwise. Keys absent from `base` are added.
pub fn merge_settings(base: Table, settings: &BTreeMap<String, String>) -> Result<Table> {
    let mut root = BTreeMap::new();
    for (key, text) in settings {
        insert(&mut root, key, text)?;
    }
    match apply(Some(Value::Table(base)), Override::Branch(root), "")? {
        Value::Table(table) => Ok(table),
        other => Err(anyhow!("settings produced a non-table root: {other}")),
    }
}

fn insert(root: &mut BTreeMap<String, Override>, key: &str, text: &str) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|part| part.is_empty()) {
        bail!("invalid setting key {key:?}");
    }
    let (last, parents) = parts.split_last().ok_or_else(|| anyhow!("empty setting key"))?;
    let mut node = root;
    for part in parents {
        let entry = node
            .entry((*part).to_string())
            .or_insert_with(|| Override::Branch(BTreeMap::new()));
        node = match entry {
            Override::Branch(children) => children,
            Override::Leaf(_) => bail!("setting {key:?} nests under a value that is also set"),
        };
    }
    if node.contains_key(*last) {
        bail!("setting {key:?} conflicts with a nested setting");
    }
    node.insert((*last).to_string(), Override::Leaf(text.to_string()));
    Ok(())
}

fn apply(base: Option<Value>, node: Override, path: &str) -> Result<Value> {
    let children = match node {
        Override::Leaf(text) => return Ok(parse_literal(&text)),
        Override::Branch(children) => children,
    };
    match base {
        Some(Value::Table(mut table)) => {
            for (key, child) in children {
                let child_path = join(path, &key);
                let merged = apply(table.remove(&key), child, &child_path)?;
                table.insert(key, merged);
            }
            Ok(Value::Table(table))
        }
        Some(Value::Array(items)) => rebuild_array(Some(items), children, path),
        None if children.keys().all(|key| key.parse::<usize>().is_ok()) => {
            rebuild_array(None, children, path)
        }
        None => {
            let mut table = Table::new();
            for (key, child) in children {
                let child_path = join(path, &key);
                let merged = apply(None, child, &child_path)?;
                table.insert(key, merged);
            }
            Ok(Value::Table(table))
        }
        Some(scalar) => bail!("cannot set nested keys under {path:?}, which holds {scalar}"),
    }
}

fn rebuild_array(
    existing: Option<Vec<Value>>,
    children: BTreeMap<String, Override>,
    path: &str,
) -> Result<Value> {
    let mut existing: Vec<Option<Value>> = existing
        .unwrap_or_default()
        .into_iter()
        .map(Some)
        .collect();
    let mut indexed = Vec::with_capacity(children.len());
    for (key, child) in children {
        let index: usize = key
            .parse()
            .map_err(|_| anyhow!("{path:?} is an array; key {key:?} is not an index"))?;
        if index == 0 {
            bail!("{path:?}: array indices start at 1");
        }
        indexed.push((index, key, child));
    }
    indexed.sort_by_key(|(index, _, _)| *index);
    for (position, (index, key, _)) in indexed.iter().enumerate() {
        if *index != position + 1 {
            bail!(
                "{path:?}: array indices must run 1..={} without gaps or repeats, got {key:?}",
                indexed.len()
            );
        }
    }

    let mut items = Vec::with_capacity(indexed.len());
    for (index, key, child) in indexed {
        let previous = existing.get_mut(index - 1).and_then(Option::take);
        items.push(apply(previous, child, &join(path, &key))?);
    }
    Ok(Value::Array(items))
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn parse_literal(text: &str) -> Value {
    if text.eq_ignore_ascii_case("true") {
        return Value::Boolean(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Boolean(false);
    }
    if let Ok(int) = text.parse::<i64>() {
        return Value::Integer(int);
    }
    if let Ok(float) = text.parse::<f64>()
        && float.is_finite()
    {
        return Value::Float(float);
    }
    Value::String(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn merges_scalars_tables_and_arrays() {
        let base: Table = toml::from_str(
            r#"
int_arg = 1
bool_arg = true
tuple_arg = [3, 3]
float_arg = 2.3
list_arg = [2, 3, 4]
nested_tuple_arg = [[2, 3], [4, 5, 6]]
nested_list_arg = [[2, 3], [4, 5, 6]]
extra_nested_list_arg = [[2, 2], [2]]
extra_arg = "extra"

[dict_arg]
a = "x"
b = [2, 3]
c = "foo"
"#,
        )
        .expect("parse base");

        let merged = merge_settings(
            base,
            &settings(&[
                ("int_arg", "3"),
                ("bool_arg", "false"),
                ("tuple_arg.1", "3"),
                ("tuple_arg.2", "4"),
                ("float_arg", "3.4"),
                ("dict_arg.b.1", "5"),
                ("dict_arg.a", "y"),
                ("list_arg.1", "5"),
                ("list_arg.2", "6"),
                ("nested_tuple_arg.1.1", "7.3"),
                ("nested_tuple_arg.1.2", "8"),
                ("nested_tuple_arg.1.3", "9"),
                ("nested_tuple_arg.2.1", "1"),
                ("nested_tuple_arg.2.2", "2"),
                ("nested_list_arg.1.1", "1"),
                ("nested_list_arg.1.2", "1"),
                ("nested_list_arg.1.3", "1"),
                ("nested_list_arg.2.1", "1"),
                ("nested_list_arg.2.2", "1"),
            ]),
        )
        .expect("merge");

        let expected: Table = toml::from_str(
            r#"
int_arg = 3
bool_arg = false
tuple_arg = [3, 4]
float_arg = 3.4
list_arg = [5, 6]
nested_tuple_arg = [[7.3, 8, 9], [1, 2]]
nested_list_arg = [[1, 1, 1], [1, 1]]
extra_nested_list_arg = [[2, 2], [2]]
extra_arg = "extra"

[dict_arg]
a = "y"
b = [5]
c = "foo"
"#,
        )
        .expect("parse expected");
        assert_eq!(merged, expected);
    }

    #[test]
    fn adds_missing_keys() {
        let merged = merge_settings(Table::new(), &settings(&[("adb.serial", "emulator-5554")]))
            .expect("merge");
        assert_eq!(merged["adb"]["serial"].as_str(), Some("emulator-5554"));
    }

    #[test]
    fn rejects_nesting_under_scalar() {
        let base: Table = toml::from_str("max_bad_states = 3").expect("parse");
        let err = merge_settings(base, &settings(&[("max_bad_states.1", "2")])).unwrap_err();
        assert!(err.to_string().contains("cannot set nested keys"));
    }

    #[test]
    fn rejects_gapped_or_repeated_indices() {
        let base: Table = toml::from_str("list = [1, 2, 3]").expect("toml");
        for keys in [["list.1", "list.3"], ["list.1", "list.01"]] {
            let settings: BTreeMap<String, String> = keys
                .iter()
                .map(|key| ((*key).to_string(), "9".to_string()))
                .collect();
            let err = merge_settings(base.clone(), &settings).unwrap_err();
            assert!(err.to_string().contains("without gaps"), "{err}");
        }
    }

    #[test]
    fn rejects_zero_index() {
        let base: Table = toml::from_str("list = [1]").expect("parse");
        let err = merge_settings(base, &settings(&[("list.0", "2")])).unwrap_err();
        assert!(err.to_string().contains("start at 1"));
    }
}
