//! Property tests for §8: commutativity, LWW, and acyclicity under
//! arbitrary merge order.

use std::collections::HashSet;

use proptest::prelude::*;
use reptree::ops::{MoveOp, Operation, SetPropertyOp};
use reptree::value::PropertyValue;
use reptree::{OpId, RepTree};

/// Turns a byte script into a valid single-peer op log: each byte picks an
/// action (create child / move existing vertex / set a property) against a
/// vertex that already exists, so every generated multiset is one a real
/// peer could have produced.
fn build_ops_from_script(script: &[u8], peer: &str) -> Vec<Operation> {
    let mut counter: u64 = 0;
    let mut ops = Vec::new();
    let mut vertices: Vec<String> = Vec::new();

    counter += 1;
    let root = "v0".to_string();
    ops.push(Operation::Move(MoveOp {
        id: OpId::new(counter, peer),
        target_id: root.clone(),
        parent_id: None,
    }));
    vertices.push(root);

    for (i, byte) in script.iter().enumerate() {
        let action = byte % 3;
        let target = vertices[(*byte as usize / 3) % vertices.len()].clone();
        match action {
            0 => {
                counter += 1;
                let new_id = format!("v{}", vertices.len());
                ops.push(Operation::Move(MoveOp {
                    id: OpId::new(counter, peer),
                    target_id: new_id.clone(),
                    parent_id: Some(target),
                }));
                vertices.push(new_id);
            }
            1 => {
                if vertices.len() > 1 {
                    let parent = vertices[(i + 1) % vertices.len()].clone();
                    if parent != target {
                        counter += 1;
                        ops.push(Operation::Move(MoveOp {
                            id: OpId::new(counter, peer),
                            target_id: target,
                            parent_id: Some(parent),
                        }));
                    }
                }
            }
            _ => {
                counter += 1;
                ops.push(Operation::SetProperty(SetPropertyOp {
                    id: OpId::new(counter, peer),
                    target_id: target,
                    key: "k".into(),
                    value: Some(PropertyValue::Number(*byte as f64)),
                    transient: false,
                }));
            }
        }
    }
    ops
}

fn snapshot(tree: &RepTree) -> (Vec<(String, Option<String>)>, Vec<(String, Option<PropertyValue>)>) {
    let mut parents: Vec<_> = tree
        .store()
        .ids()
        .map(|id| (id.clone(), tree.store().get(id).unwrap().parent_id.clone()))
        .collect();
    let mut props: Vec<_> = tree
        .store()
        .ids()
        .filter_map(|id| tree.store().get(id).map(|v| (id.clone(), v.get("k").cloned())))
        .collect();
    parents.sort();
    props.sort_by(|a, b| a.0.cmp(&b.0));
    (parents, props)
}

proptest! {
    /// Property 1 (commutativity): building a RepTree from any permutation
    /// of the same op multiset yields an identical parent/property snapshot.
    #[test]
    fn commutativity_under_permutation(script in prop::collection::vec(any::<u8>(), 0..80), rotate in 0usize..40) {
        let ops = build_ops_from_script(&script, "peer-1");

        let forward = {
            let mut t = RepTree::new("reader", vec![]);
            t.merge(ops.clone());
            t
        };

        let mut reversed_ops = ops.clone();
        reversed_ops.reverse();
        let reversed = {
            let mut t = RepTree::new("reader", vec![]);
            t.merge(reversed_ops);
            t
        };

        let mut rotated_ops = ops.clone();
        if !rotated_ops.is_empty() {
            let r = rotate % rotated_ops.len();
            rotated_ops.rotate_left(r);
        }
        let rotated = {
            let mut t = RepTree::new("reader", vec![]);
            t.merge(rotated_ops);
            t
        };

        prop_assert_eq!(snapshot(&forward), snapshot(&reversed));
        prop_assert_eq!(snapshot(&forward), snapshot(&rotated));
    }

    /// Property 1, split-merge variant: merging the multiset in two
    /// arbitrarily-sized batches (instead of one call) converges to the
    /// same snapshot as a single merge.
    #[test]
    fn commutativity_under_split_merge(script in prop::collection::vec(any::<u8>(), 0..80), split in 0usize..80) {
        let ops = build_ops_from_script(&script, "peer-1");

        let single = {
            let mut t = RepTree::new("reader", vec![]);
            t.merge(ops.clone());
            t
        };

        let split_point = if ops.is_empty() { 0 } else { split % ops.len() };
        let (first, second) = ops.split_at(split_point);
        let split_merged = {
            let mut t = RepTree::new("reader", vec![]);
            t.merge(second.to_vec());
            t.merge(first.to_vec());
            t
        };

        prop_assert_eq!(snapshot(&single), snapshot(&split_merged));
    }

    /// Property 2 (LWW): the applied value for any (target, key) equals that
    /// of the op with the maximum OpId among all ops written for that pair.
    #[test]
    fn lww_matches_max_opid_writer(script in prop::collection::vec(any::<u8>(), 1..80)) {
        let ops = build_ops_from_script(&script, "peer-1");

        let mut expected: std::collections::HashMap<String, (OpId, Option<PropertyValue>)> = std::collections::HashMap::new();
        for op in &ops {
            if let Operation::SetProperty(p) = op {
                let entry = expected.entry(p.target_id.clone()).or_insert_with(|| (p.id.clone(), p.value.clone()));
                if p.id > entry.0 {
                    *entry = (p.id.clone(), p.value.clone());
                }
            }
        }

        let mut tree = RepTree::new("reader", vec![]);
        tree.merge(ops);

        for (target, (_, expected_value)) in expected {
            let actual = tree.store().get(&target).and_then(|v| v.get("k")).cloned();
            prop_assert_eq!(actual, expected_value);
        }
    }

    /// Property 3 (acyclicity): after merging, walking ancestors from any
    /// vertex always reaches the root (or None) without revisiting a node.
    #[test]
    fn acyclicity_after_merge(script in prop::collection::vec(any::<u8>(), 0..80)) {
        let ops = build_ops_from_script(&script, "peer-1");
        let mut tree = RepTree::new("reader", vec![]);
        tree.merge(ops);

        for id in tree.store().ids().cloned().collect::<Vec<_>>() {
            let mut visited = HashSet::new();
            let mut current = Some(id.clone());
            let mut steps = 0;
            while let Some(node) = current {
                prop_assert!(visited.insert(node.clone()), "cycle detected reaching back to {node}");
                current = tree.store().get(&node).and_then(|v| v.parent_id.clone());
                steps += 1;
                prop_assert!(steps <= tree.store().len() + 1, "ancestor walk exceeded vertex count, likely a cycle");
            }
        }
    }
}

/// Property 6 (round-trip): encoding any op and decoding it back yields a
/// byte-identical op.
#[test]
fn round_trip_encode_decode_is_identity() {
    let ops = vec![
        Operation::Move(MoveOp { id: OpId::new(1, "a"), target_id: "v1".into(), parent_id: None }),
        Operation::Move(MoveOp { id: OpId::new(2, "a"), target_id: "v2".into(), parent_id: Some("v1".into()) }),
        Operation::SetProperty(SetPropertyOp {
            id: OpId::new(3, "a"),
            target_id: "v1".into(),
            key: "name".into(),
            value: Some(PropertyValue::String("hi".into())),
            transient: false,
        }),
        Operation::SetProperty(SetPropertyOp {
            id: OpId::new(4, "a"),
            target_id: "v1".into(),
            key: "absent".into(),
            value: None,
            transient: false,
        }),
    ];
    for op in ops {
        let line = op.encode_line();
        let decoded = Operation::decode_line(&line, &"a".to_string()).unwrap();
        let re_encoded = decoded.encode_line();
        assert_eq!(line, re_encoded);
    }
}
