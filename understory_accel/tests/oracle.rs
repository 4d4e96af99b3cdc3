// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Every structure must agree with a brute-force scan over the same payloads.

use std::collections::BTreeMap;

use glam::Vec3;
use proptest::prelude::*;
use understory_accel::{
    Aabb3D, AabbTree, Cast, CastHit, GridAccel, QueryLength, SpatialAcceleration, TreeConfig,
    UniformGrid,
};

#[derive(Clone, Debug)]
enum Op {
    Insert(Aabb3D),
    Move(usize, Aabb3D),
    Unbound(usize),
    Remove(usize),
}

fn arb_box() -> impl Strategy<Value = Aabb3D> {
    (
        -100.0_f32..100.0,
        -100.0_f32..100.0,
        -100.0_f32..100.0,
        0.1_f32..12.0,
        0.1_f32..12.0,
        0.1_f32..12.0,
    )
        .prop_map(|(x, y, z, w, h, d)| Aabb3D::new(Vec3::new(x, y, z), Vec3::new(x + w, y + h, z + d)))
}

fn arb_component() -> impl Strategy<Value = f32> {
    prop_oneof![1 => Just(0.0_f32), 4 => -1.0_f32..1.0]
}

fn arb_dir() -> impl Strategy<Value = Vec3> {
    (arb_component(), arb_component(), arb_component()).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => arb_box().prop_map(Op::Insert),
        3 => (any::<usize>(), arb_box()).prop_map(|(i, b)| Op::Move(i, b)),
        1 => any::<usize>().prop_map(Op::Unbound),
        2 => any::<usize>().prop_map(Op::Remove),
    ]
}

fn config() -> TreeConfig {
    TreeConfig::default()
        .with_max_children_in_leaf(4)
        .with_max_payload_bounds(20.0)
        .with_dirty_element_ceiling(16)
}

/// Brute-force reference: payload to bounds, `None` meaning unbounded.
type Model = BTreeMap<u32, Option<Aabb3D>>;

fn model_bounds(bounds: Option<Aabb3D>) -> Aabb3D {
    bounds.unwrap_or(Aabb3D::INFINITE)
}

fn oracle_overlap(model: &Model, q: &Aabb3D) -> Vec<u32> {
    model
        .iter()
        .filter(|(_, b)| model_bounds(**b).intersects(q))
        .map(|(p, _)| *p)
        .collect()
}

fn oracle_cast(model: &Model, cast: &Cast, length: f32) -> Vec<u32> {
    model
        .iter()
        .filter(|(_, b)| cast.hit(&model_bounds(**b), length).is_some())
        .map(|(p, _)| *p)
        .collect()
}

fn overlap_of<S: SpatialAcceleration<u32>>(s: &S, q: &Aabb3D) -> Vec<u32> {
    let mut out = s.find_all_intersections(q).unwrap();
    out.sort_unstable();
    out
}

fn cast_of<S: SpatialAcceleration<u32>>(s: &S, cast: &Cast, length: f32) -> Vec<u32> {
    let mut out = Vec::new();
    let mut len = QueryLength::new(length);
    s.cast_with(cast, &mut len, &mut |h: &CastHit<u32>, _: &mut QueryLength| {
        out.push(h.payload);
        true
    })
    .unwrap();
    out.sort_unstable();
    out
}

fn check_against_model<S: SpatialAcceleration<u32>>(
    s: &S,
    model: &Model,
    queries: &[Aabb3D],
    casts: &[(Vec3, Vec3, Vec3)],
) -> Result<(), TestCaseError> {
    prop_assert_eq!(s.len(), model.len());
    for q in queries {
        prop_assert_eq!(overlap_of(s, q), oracle_overlap(model, q));
    }
    for &(origin, dir, half_extents) in casts {
        let cast = Cast::sweep(origin, dir, half_extents);
        prop_assert_eq!(cast_of(s, &cast, 300.0), oracle_cast(model, &cast, 300.0));
    }
    Ok(())
}

fn resolve(model: &Model, pick: usize) -> Option<u32> {
    if model.is_empty() {
        return None;
    }
    model.keys().nth(pick % model.len()).copied()
}

fn arb_casts() -> impl Strategy<Value = Vec<(Vec3, Vec3, Vec3)>> {
    prop::collection::vec(
        (
            arb_box().prop_map(|b| b.center()),
            arb_dir(),
            prop_oneof![Just(Vec3::ZERO), (0.0_f32..3.0).prop_map(Vec3::splat)],
        ),
        1..6,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn bulk_build_matches_brute_force(
        boxes in prop::collection::vec(prop::option::weighted(0.95, arb_box()), 0..200),
        queries in prop::collection::vec(arb_box(), 1..8),
        casts in arb_casts(),
    ) {
        let model: Model = boxes.iter().enumerate().map(|(i, b)| (i as u32, *b)).collect();
        let input: Vec<_> = model.iter().map(|(p, b)| (*p, *b)).collect();

        let tree: AabbTree<u32> = AabbTree::from_elements(input.clone(), config()).unwrap();
        check_against_model(&tree, &model, &queries, &casts)?;
        let grid_tree: AabbTree<u32, UniformGrid<u32>> =
            AabbTree::from_elements(input.clone(), config()).unwrap();
        check_against_model(&grid_tree, &model, &queries, &casts)?;
        let grid = GridAccel::from_elements(input, config()).unwrap();
        check_against_model(&grid, &model, &queries, &casts)?;
    }

    #[test]
    fn mutations_and_reoptimize_match_brute_force(
        boxes in prop::collection::vec(arb_box(), 0..60),
        ops in prop::collection::vec(arb_op(), 0..120),
        queries in prop::collection::vec(arb_box(), 1..8),
        casts in arb_casts(),
    ) {
        let mut model: Model = boxes.iter().enumerate().map(|(i, b)| (i as u32, Some(*b))).collect();
        let input: Vec<_> = model.iter().map(|(p, b)| (*p, *b)).collect();
        let mut tree: AabbTree<u32> = AabbTree::from_elements(input.clone(), config()).unwrap();
        let mut grid_tree: AabbTree<u32, UniformGrid<u32>> =
            AabbTree::from_elements(input.clone(), config()).unwrap();
        let mut grid = GridAccel::from_elements(input, config()).unwrap();
        let mut next = boxes.len() as u32;

        for op in ops {
            match op {
                Op::Insert(b) => {
                    tree.insert_element(next, b, true).unwrap();
                    grid_tree.insert_element(next, b, true).unwrap();
                    grid.insert_element(next, b, true).unwrap();
                    model.insert(next, Some(b));
                    next += 1;
                }
                Op::Move(pick, b) => {
                    if let Some(p) = resolve(&model, pick) {
                        tree.update_element(p, b, true).unwrap();
                        grid_tree.update_element(p, b, true).unwrap();
                        grid.update_element(p, b, true).unwrap();
                        model.insert(p, Some(b));
                    }
                }
                Op::Unbound(pick) => {
                    if let Some(p) = resolve(&model, pick) {
                        tree.update_element(p, Aabb3D::INFINITE, false).unwrap();
                        grid_tree.update_element(p, Aabb3D::INFINITE, false).unwrap();
                        grid.update_element(p, Aabb3D::INFINITE, false).unwrap();
                        model.insert(p, None);
                    }
                }
                Op::Remove(pick) => {
                    if let Some(p) = resolve(&model, pick) {
                        tree.remove_element(p).unwrap();
                        grid_tree.remove_element(p).unwrap();
                        grid.remove_element(p).unwrap();
                        model.remove(&p);
                    }
                }
            }
        }
        check_against_model(&tree, &model, &queries, &casts)?;
        check_against_model(&grid_tree, &model, &queries, &casts)?;
        check_against_model(&grid, &model, &queries, &casts)?;

        tree.reoptimize().unwrap();
        prop_assert_eq!(tree.num_dirty_elements(), 0);
        check_against_model(&tree, &model, &queries, &casts)?;
        grid_tree.reoptimize().unwrap();
        prop_assert_eq!(grid_tree.num_dirty_elements(), 0);
        check_against_model(&grid_tree, &model, &queries, &casts)?;
        grid.rebuild().unwrap();
        check_against_model(&grid, &model, &queries, &casts)?;
    }

    #[test]
    fn removed_payloads_are_never_reported(
        boxes in prop::collection::vec(arb_box(), 1..80),
        picks in prop::collection::vec(any::<usize>(), 1..20),
    ) {
        let input: Vec<_> = boxes.iter().enumerate().map(|(i, b)| (i as u32, Some(*b))).collect();
        let mut tree: AabbTree<u32> = AabbTree::from_elements(input.clone(), config()).unwrap();
        let mut grid_tree: AabbTree<u32, UniformGrid<u32>> =
            AabbTree::from_elements(input, config()).unwrap();
        let mut removed = Vec::new();
        for pick in picks {
            let p = (pick % boxes.len()) as u32;
            let from_tree = tree.remove_element(p).is_ok();
            prop_assert_eq!(grid_tree.remove_element(p).is_ok(), from_tree);
            if from_tree {
                removed.push(p);
            }
        }
        let everything = Aabb3D::new(Vec3::splat(-1000.0), Vec3::splat(1000.0));
        let hits = overlap_of(&tree, &everything);
        let grid_hits = overlap_of(&grid_tree, &everything);
        prop_assert_eq!(&hits, &grid_hits);
        for p in removed {
            prop_assert!(!hits.contains(&p), "removed payload {} was reported", p);
            prop_assert!(!tree.contains_payload(p));
            prop_assert!(!grid_tree.contains_payload(p));
        }
    }

    #[test]
    fn repeated_move_is_idempotent(
        boxes in prop::collection::vec(arb_box(), 1..80),
        pick in any::<usize>(),
        target in arb_box(),
        queries in prop::collection::vec(arb_box(), 1..8),
    ) {
        let input: Vec<_> = boxes.iter().enumerate().map(|(i, b)| (i as u32, Some(*b))).collect();
        let mut tree: AabbTree<u32> = AabbTree::from_elements(input, config()).unwrap();
        let p = (pick % boxes.len()) as u32;
        tree.update_element(p, target, true).unwrap();
        let once: Vec<_> = queries.iter().map(|q| overlap_of(&tree, q)).collect();
        let location = tree.location(p);
        tree.update_element(p, target, true).unwrap();
        let twice: Vec<_> = queries.iter().map(|q| overlap_of(&tree, q)).collect();
        prop_assert_eq!(once, twice);
        prop_assert_eq!(tree.location(p), location);
    }

    #[test]
    fn time_slicing_terminates_within_bound(
        boxes in prop::collection::vec(arb_box(), 0..400),
        budget in 1_usize..64,
    ) {
        let config = config().with_max_elements_per_time_slice(budget);
        let n = boxes.len();
        let bound = n * (config.max_tree_depth + 1) / budget + 2;
        let input = boxes.iter().enumerate().map(|(i, b)| (i as u32, Some(*b)));
        let mut tree: AabbTree<u32> = AabbTree::new_time_sliced(input.clone(), config).unwrap();
        let mut calls = 0;
        while !tree.progress_time_slicing(false).unwrap() {
            calls += 1;
            prop_assert!(calls <= bound, "{} calls exceeded the bound {}", calls, bound);
        }
        prop_assert_eq!(tree.len(), n);

        let mut forced: AabbTree<u32> = AabbTree::new_time_sliced(input, config).unwrap();
        prop_assert!(forced.progress_time_slicing(true).unwrap());
        prop_assert!(forced.is_build_complete());
    }
}
