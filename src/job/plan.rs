// src/job/plan.rs - Turn a pattern snapshot into an executable plan
use serde::{Deserialize, Serialize};

use super::JobError;
use crate::config::{GeometryConfig, PenConfig, PenTable};
use crate::geometry::{Pattern, Point, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Optimize {
    /// Keep the pattern's own order.
    None,
    /// Greedy nearest-neighbour reordering.
    Nn,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombineOptions {
    pub join_tol_mm: Option<f64>,
}

/// Simplify to `max_dev_mm`, then resample at `spacing_mm`; either may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResampleOptions {
    pub spacing_mm: Option<f64>,
    pub max_dev_mm: Option<f64>,
}

/// Options accepted by `start()`. All optional; an empty object plots the
/// pattern as stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobOptions {
    pub optimize: Option<Optimize>,
    pub combine: Option<CombineOptions>,
    pub resample: Option<ResampleOptions>,
    /// Plot only these pens (still subject to each pen's `enabled` flag).
    pub pens: Option<Vec<u32>>,
    /// Placement applied to the run's copy before any other step.
    pub transform: Option<Transform>,
    /// Travel back to the origin after the last stroke.
    pub return_home: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStroke {
    pub points: Vec<Point>,
    pub pen: PenConfig,
}

impl PlannedStroke {
    pub fn segments(&self) -> usize {
        self.points.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobPlan {
    pub strokes: Vec<PlannedStroke>,
    pub total_segments: usize,
    pub return_home: bool,
    /// Pipeline reports, in the order the steps ran.
    pub notes: Vec<String>,
}

/// Build the plan for a run. Works on a copy; the stored pattern is never touched.
pub fn build_plan(
    pattern: &Pattern,
    options: &JobOptions,
    pens: &PenTable,
    geometry: &GeometryConfig,
    start: Point,
) -> Result<JobPlan, JobError> {
    pattern
        .validate()
        .map_err(|e| JobError::Validation(e.to_string()))?;

    let selected = |pen: u32| {
        pens.is_enabled(pen) && options.pens.as_ref().is_none_or(|only| only.contains(&pen))
    };
    let mut work = Pattern::from_strokes(
        pattern
            .iter()
            .filter(|s| selected(s.pen))
            .cloned()
            .collect(),
    );
    let skipped = pattern.len() - work.len();
    let mut notes = Vec::new();
    if skipped > 0 {
        notes.push(format!("Skipped {} strokes on disabled or unselected pens", skipped));
    }

    if let Some(transform) = &options.transform {
        if !(transform.scale > 0.0) {
            return Err(JobError::Validation(format!("transform scale must be > 0, got {}", transform.scale)));
        }
        work.transform(transform);
        work.validate().map_err(|e| JobError::Validation(format!("transform: {}", e)))?;
        let fit = work.bounding_box().map(|b| {
            format!(
                "Transform: bounds ({:.1}, {:.1})-({:.1}, {:.1})",
                b.min.x, b.min.y, b.max.x, b.max.y
            )
        });
        notes.extend(fit);
    }

    if let Some(combine) = &options.combine {
        let tol = combine.join_tol_mm.unwrap_or(geometry.join_tolerance_mm);
        if !(tol >= 0.0) || !tol.is_finite() {
            return Err(JobError::Validation(format!("join_tol_mm must be >= 0, got {}", tol)));
        }
        notes.push(work.merge_chains(tol).to_string());
    }

    if let Some(resample) = &options.resample {
        if let Some(max_dev) = resample.max_dev_mm {
            let report = work.simplify(max_dev).map_err(|e| JobError::Validation(e.to_string()))?;
            notes.push(report.to_string());
        }
        match resample.spacing_mm.or(geometry.resample_spacing_mm) {
            Some(spacing) => {
                let report = work
                    .resample_polylines(spacing)
                    .map_err(|e| JobError::Validation(e.to_string()))?;
                notes.push(report.to_string());
            }
            None if resample.max_dev_mm.is_none() => {
                return Err(JobError::Validation(
                    "resample requested without spacing_mm or max_dev_mm".to_string(),
                ));
            }
            None => {}
        }
    }

    if options.optimize == Some(Optimize::Nn) {
        notes.push(work.optimize_order_nn(start).to_string());
    }

    if work.is_empty() {
        return Err(JobError::Validation(
            "nothing to plot: no strokes on enabled pens".to_string(),
        ));
    }

    let strokes: Vec<PlannedStroke> = work
        .strokes
        .into_iter()
        .map(|s| PlannedStroke {
            pen: pens.get(s.pen),
            points: s.points,
        })
        .collect();
    let total_segments = strokes.iter().map(PlannedStroke::segments).sum();

    Ok(JobPlan {
        strokes,
        total_segments,
        return_home: options.return_home,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Stroke;

    fn pattern() -> Pattern {
        Pattern::from_strokes(vec![
            Stroke::new(vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(10.0, 10.0)], 0),
            Stroke::new(vec![Point::new(50.0, 50.0), Point::new(60.0, 50.0)], 1),
            Stroke::new(vec![Point::new(5.0, 5.0)], 0),
        ])
    }

    fn pens() -> PenTable {
        let mut red = PenConfig::baseline(1, 800);
        red.enabled = false;
        PenTable::new(vec![PenConfig::baseline(0, 500), red], 3000)
    }

    #[test]
    fn test_disabled_pens_are_excluded_from_totals() {
        let plan = build_plan(&pattern(), &JobOptions::default(), &pens(), &GeometryConfig::default(), Point::ORIGIN).unwrap();
        assert_eq!(plan.strokes.len(), 2);
        assert_eq!(plan.total_segments, 2);
        assert_eq!(plan.strokes[0].pen.feed_rate, 500);
        assert_eq!(plan.notes.len(), 1);
    }

    #[test]
    fn test_pen_filter_can_empty_the_plan() {
        let options = JobOptions {
            pens: Some(vec![1]),
            ..JobOptions::default()
        };
        let err = build_plan(&pattern(), &options, &pens(), &GeometryConfig::default(), Point::ORIGIN).unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
    }

    #[test]
    fn test_pipeline_does_not_touch_the_source() {
        let source = pattern();
        let options = JobOptions {
            optimize: Some(Optimize::Nn),
            resample: Some(ResampleOptions {
                spacing_mm: Some(1.0),
                ..ResampleOptions::default()
            }),
            ..JobOptions::default()
        };
        let plan = build_plan(&source, &options, &pens(), &GeometryConfig::default(), Point::ORIGIN).unwrap();
        assert_eq!(source, pattern());
        assert_eq!(plan.total_segments, 20);
        assert_eq!(plan.notes.len(), 3);
    }

    #[test]
    fn test_simplify_before_resample() {
        let source = Pattern::from_strokes(vec![Stroke::new(
            vec![Point::new(0.0, 0.0), Point::new(5.0, 0.02), Point::new(10.0, 0.0), Point::new(10.0, 10.0)],
            0,
        )]);
        let simplify_only = JobOptions {
            resample: Some(ResampleOptions {
                max_dev_mm: Some(0.1),
                ..ResampleOptions::default()
            }),
            ..JobOptions::default()
        };
        let plan = build_plan(&source, &simplify_only, &pens(), &GeometryConfig::default(), Point::ORIGIN).unwrap();
        assert_eq!(plan.total_segments, 2);
        assert_eq!(plan.strokes[0].points[1], Point::new(10.0, 0.0));

        let both = JobOptions {
            resample: Some(ResampleOptions {
                spacing_mm: Some(5.0),
                max_dev_mm: Some(0.1),
            }),
            ..JobOptions::default()
        };
        let plan = build_plan(&source, &both, &pens(), &GeometryConfig::default(), Point::ORIGIN).unwrap();
        assert_eq!(plan.total_segments, 4);
        assert_eq!(plan.notes.len(), 2);

        let bad = JobOptions {
            resample: Some(ResampleOptions {
                max_dev_mm: Some(-1.0),
                ..ResampleOptions::default()
            }),
            ..JobOptions::default()
        };
        let err = build_plan(&source, &bad, &pens(), &GeometryConfig::default(), Point::ORIGIN).unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
    }

    #[test]
    fn test_transform_places_the_run_copy() {
        let source = pattern();
        let options = JobOptions {
            transform: Some(Transform::translate(20.0, 30.0).scaled(2.0)),
            ..JobOptions::default()
        };
        let plan = build_plan(&source, &options, &pens(), &GeometryConfig::default(), Point::ORIGIN).unwrap();
        assert_eq!(plan.strokes[0].points[2], Point::new(40.0, 50.0));
        assert_eq!(source, pattern());

        let flat = JobOptions {
            transform: Some(Transform::default().scaled(0.0)),
            ..JobOptions::default()
        };
        assert!(build_plan(&source, &flat, &pens(), &GeometryConfig::default(), Point::ORIGIN).is_err());
        let huge = JobOptions {
            transform: Some(Transform::default().scaled(1e308)),
            ..JobOptions::default()
        };
        assert!(build_plan(&source, &huge, &pens(), &GeometryConfig::default(), Point::ORIGIN).is_err());
    }

    #[test]
    fn test_options_parse_from_json() {
        let options: JobOptions =
            serde_json::from_str(r#"{"optimize":"nn","combine":{"join_tol_mm":0.1},"pens":[0],"return_home":true}"#).unwrap();
        assert_eq!(options.optimize, Some(Optimize::Nn));
        assert_eq!(options.combine.unwrap().join_tol_mm, Some(0.1));
        assert!(options.return_home);
        let empty: JobOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, JobOptions::default());
    }
}
