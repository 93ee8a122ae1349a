//! Built-in functions available to cell code and macros.
//!
//! Conventions:
//! - The grid handle `S` is registered as the `Grid` type with `cell`,
//!   `code`, `block`, `shape` and `chart`.
//! - Helpers over arrays (`nn`, `arange`, `sum`) and encodings
//!   (`b64encode`, `b64decode`) are lower case.
//! - Volatile spreadsheet functions (`RAND`, `RANDINT`, `NOW`, `TODAY`) are
//!   ALL CAPS.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Position};

use crate::chart::{ChartKind, ChartSpec};
use crate::engine::{
    Block, CHECK_INTERVAL, CellValue, Deadline, EvalError, EvalErrorKind, GridHandle, Index, Key, Shape,
};

/// Longest array `arange` builds.
pub const MAX_ARANGE_LEN: usize = 10_000_000;

fn invalid_arg(message: &str) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(message.into(), Position::NONE).into()
}

/// Raise an engine error inside Rhai, keeping its kind.
fn raise(err: EvalError) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(Dynamic::from(err), Position::NONE).into()
}

fn to_usize(value: i64, label: &str) -> Result<usize, Box<EvalAltResult>> {
    usize::try_from(value).map_err(|_| invalid_arg(&format!("{} must be >= 0", label)))
}

fn grid_shape(grid: &GridHandle) -> Result<Shape, Box<EvalAltResult>> {
    grid.shape().map_err(raise)
}

/// Resolve possibly negative cell indices against the grid.
fn resolve_key(
    grid: &GridHandle,
    row: i64,
    col: i64,
    sheet: i64,
) -> Result<Key, Box<EvalAltResult>> {
    let shape = grid_shape(grid)?;
    let resolve = |value: i64, len: usize, label: &str| {
        Index::resolve(value, len).ok_or_else(|| {
            invalid_arg(&format!("{} index {} out of range 0..{}", label, value, len))
        })
    };
    Ok(Key::new(
        resolve(row, shape.rows, "row")?,
        resolve(col, shape.cols, "column")?,
        resolve(sheet, shape.sheets, "sheet")?,
    ))
}

fn cell_value(grid: &GridHandle, key: Key) -> Result<Dynamic, Box<EvalAltResult>> {
    match grid.value(key).map_err(raise)? {
        None => Ok(Dynamic::UNIT),
        Some(CellValue::Value(value)) => Ok(value),
        Some(CellValue::Error(err)) if err.kind == EvalErrorKind::Circular => Err(raise(err)),
        Some(CellValue::Error(err)) => Err(invalid_arg(&format!("Cell {} failed: {}", key, err))),
    }
}

fn block_values(
    grid: &GridHandle,
    corners: [i64; 4],
    sheet: i64,
    deadline: &Deadline,
) -> Result<Array, Box<EvalAltResult>> {
    let [top, left, bottom, right] = corners;
    let first = resolve_key(grid, top, left, sheet)?;
    let last = resolve_key(grid, bottom, right, sheet)?;
    let block = Block::new(first.row, first.col, last.row, last.col);
    let mut rows = Array::with_capacity(block.bottom - block.top + 1);
    let mut count = 0;
    for row in block.top..=block.bottom {
        let mut values = Array::with_capacity(block.right - block.left + 1);
        for col in block.left..=block.right {
            deadline.check(count)?;
            count += 1;
            values.push(cell_value(grid, Key::new(row, col, first.sheet))?);
        }
        rows.push(Dynamic::from_array(values));
    }
    Ok(rows)
}

fn flatten_into(
    value: Dynamic,
    out: &mut Array,
    count: &mut usize,
    deadline: &Deadline,
) -> Result<(), Box<EvalAltResult>> {
    deadline.check(*count)?;
    *count += 1;
    if value.is_array() {
        for item in value.into_array().unwrap_or_default() {
            flatten_into(item, out, count, deadline)?;
        }
    } else if !value.is_unit() {
        out.push(value);
    }
    Ok(())
}

/// Flatten nested arrays and drop empty values.
pub fn nn(values: Array, deadline: &Deadline) -> Result<Array, Box<EvalAltResult>> {
    let mut out = Array::new();
    let mut count = 0;
    for value in values {
        flatten_into(value, &mut out, &mut count, deadline)?;
    }
    Ok(out)
}

/// Integers from `start` towards `stop` (exclusive) in steps of `step`.
///
/// At most [`MAX_ARANGE_LEN`] items.
pub fn arange(
    start: i64,
    stop: i64,
    step: i64,
    deadline: &Deadline,
) -> Result<Array, Box<EvalAltResult>> {
    if step == 0 {
        return Err(invalid_arg("arange step must not be 0"));
    }
    let len = if (step > 0 && start < stop) || (step < 0 && start > stop) {
        let span = (i128::from(stop) - i128::from(start)).unsigned_abs();
        span.div_ceil(i128::from(step).unsigned_abs())
    } else {
        0
    };
    if len > MAX_ARANGE_LEN as u128 {
        return Err(invalid_arg(&format!(
            "arange would produce {} items, limit is {}",
            len, MAX_ARANGE_LEN
        )));
    }
    let mut out = Array::with_capacity(len.min(CHECK_INTERVAL as u128) as usize);
    let mut next = Some(start);
    while let Some(i) = next
        && ((step > 0 && i < stop) || (step < 0 && i > stop))
    {
        deadline.check(out.len())?;
        out.push(Dynamic::from_int(i));
        next = i.checked_add(step);
    }
    Ok(out)
}

/// Sum of the numeric entries, searched through nested arrays.
///
/// Stays an integer while every entry is one.
pub fn sum(values: Array, deadline: &Deadline) -> Result<Dynamic, Box<EvalAltResult>> {
    let mut int_total: i64 = 0;
    let mut float_total = 0.0;
    let mut saw_float = false;
    for (count, value) in nn(values, deadline)?.into_iter().enumerate() {
        deadline.check(count)?;
        if let Ok(n) = value.as_int() {
            int_total = int_total.wrapping_add(n);
        } else if let Ok(n) = value.as_float() {
            float_total += n;
            saw_float = true;
        }
    }
    Ok(if saw_float {
        Dynamic::from_float(float_total + int_total as f64)
    } else {
        Dynamic::from_int(int_total)
    })
}

fn shape_array(grid: &GridHandle) -> Result<Array, Box<EvalAltResult>> {
    let shape = grid_shape(grid)?;
    Ok([shape.rows, shape.cols, shape.sheets]
        .into_iter()
        .map(|n| Dynamic::from_int(i64::try_from(n).unwrap_or(i64::MAX)))
        .collect())
}

#[derive(Default)]
struct ChartLabels {
    title: Option<String>,
    x_label: Option<String>,
    y_label: Option<String>,
}

fn make_chart(
    grid: &GridHandle,
    kind: &str,
    corners: [i64; 4],
    labels: ChartLabels,
) -> Result<String, Box<EvalAltResult>> {
    let kind = ChartKind::from_tag(kind)
        .ok_or_else(|| invalid_arg(&format!("unknown chart kind '{}'", kind)))?;
    let [top, left, bottom, right] = corners;
    let area = Block::new(
        to_usize(top, "top")?,
        to_usize(left, "left")?,
        to_usize(bottom, "bottom")?,
        to_usize(right, "right")?,
    );
    let mut spec = ChartSpec::new(kind, area, grid.sheet());
    let ChartLabels {
        title,
        x_label,
        y_label,
    } = labels;
    let non_empty = |label: Option<String>| label.filter(|l| !l.is_empty());
    spec.title = non_empty(title);
    spec.x_label = non_empty(x_label);
    spec.y_label = non_empty(y_label);
    spec.validate().map_err(|e| invalid_arg(&e))?;
    Ok(spec.encode())
}

/// Register all built-in functions into the Rhai engine.
///
/// Builtins that loop over large inputs poll `deadline`.
pub fn register_builtins(engine: &mut Engine, deadline: &Arc<Deadline>) {
    engine.register_type_with_name::<GridHandle>("Grid");

    // S.cell(row, col[, sheet]): evaluated value of a cell
    engine.register_fn(
        "cell",
        |grid: GridHandle, row: i64, col: i64| -> Result<Dynamic, Box<EvalAltResult>> {
            let sheet = i64::try_from(grid.sheet()).unwrap_or(i64::MAX);
            let key = resolve_key(&grid, row, col, sheet)?;
            cell_value(&grid, key)
        },
    );
    engine.register_fn(
        "cell",
        |grid: GridHandle,
         row: i64,
         col: i64,
         sheet: i64|
         -> Result<Dynamic, Box<EvalAltResult>> {
            let key = resolve_key(&grid, row, col, sheet)?;
            cell_value(&grid, key)
        },
    );

    // S.code(row, col[, sheet]): source text of a cell, () when empty
    engine.register_fn(
        "code",
        |grid: GridHandle, row: i64, col: i64| -> Result<Dynamic, Box<EvalAltResult>> {
            let sheet = i64::try_from(grid.sheet()).unwrap_or(i64::MAX);
            let key = resolve_key(&grid, row, col, sheet)?;
            Ok(grid.code(key).map_err(raise)?.map_or(Dynamic::UNIT, Dynamic::from))
        },
    );
    engine.register_fn(
        "code",
        |grid: GridHandle,
         row: i64,
         col: i64,
         sheet: i64|
         -> Result<Dynamic, Box<EvalAltResult>> {
            let key = resolve_key(&grid, row, col, sheet)?;
            Ok(grid.code(key).map_err(raise)?.map_or(Dynamic::UNIT, Dynamic::from))
        },
    );

    // S.block(top, left, bottom, right[, sheet]): inclusive block as rows
    let block_deadline = Arc::clone(deadline);
    engine.register_fn(
        "block",
        move |grid: GridHandle,
              top: i64,
              left: i64,
              bottom: i64,
              right: i64|
              -> Result<Array, Box<EvalAltResult>> {
            let sheet = i64::try_from(grid.sheet()).unwrap_or(i64::MAX);
            block_values(&grid, [top, left, bottom, right], sheet, &block_deadline)
        },
    );
    let block_deadline = Arc::clone(deadline);
    engine.register_fn(
        "block",
        move |grid: GridHandle,
              top: i64,
              left: i64,
              bottom: i64,
              right: i64,
              sheet: i64|
              -> Result<Array, Box<EvalAltResult>> {
            block_values(&grid, [top, left, bottom, right], sheet, &block_deadline)
        },
    );

    // S.shape: [rows, cols, sheets]
    engine.register_get("shape", |grid: &mut GridHandle| shape_array(grid));
    engine.register_fn("shape", |grid: GridHandle| shape_array(&grid));

    let d = Arc::clone(deadline);
    engine.register_fn("nn", move |values: Array| nn(values, &d));
    let d = Arc::clone(deadline);
    engine.register_fn("arange", move |stop: i64| arange(0, stop, 1, &d));
    let d = Arc::clone(deadline);
    engine.register_fn("arange", move |start: i64, stop: i64| arange(start, stop, 1, &d));
    let d = Arc::clone(deadline);
    engine.register_fn("arange", move |start: i64, stop: i64, step: i64| {
        arange(start, stop, step, &d)
    });
    let d = Arc::clone(deadline);
    engine.register_fn("sum", move |values: Array| sum(values, &d));

    // S.chart(kind, top, left, bottom, right[, title[, x_label, y_label]])
    // on the current sheet
    engine.register_fn(
        "chart",
        |grid: GridHandle,
         kind: &str,
         top: i64,
         left: i64,
         bottom: i64,
         right: i64|
         -> Result<String, Box<EvalAltResult>> {
            make_chart(&grid, kind, [top, left, bottom, right], ChartLabels::default())
        },
    );
    engine.register_fn(
        "chart",
        |grid: GridHandle,
         kind: &str,
         top: i64,
         left: i64,
         bottom: i64,
         right: i64,
         title: String|
         -> Result<String, Box<EvalAltResult>> {
            let labels = ChartLabels {
                title: Some(title),
                ..ChartLabels::default()
            };
            make_chart(&grid, kind, [top, left, bottom, right], labels)
        },
    );
    engine.register_fn(
        "chart",
        |grid: GridHandle,
         kind: &str,
         top: i64,
         left: i64,
         bottom: i64,
         right: i64,
         title: String,
         x_label: String,
         y_label: String|
         -> Result<String, Box<EvalAltResult>> {
            let labels = ChartLabels {
                title: Some(title),
                x_label: Some(x_label),
                y_label: Some(y_label),
            };
            make_chart(&grid, kind, [top, left, bottom, right], labels)
        },
    );

    engine.register_fn("b64encode", |text: &str| -> String { STANDARD.encode(text) });
    engine.register_fn(
        "b64decode",
        |text: &str| -> Result<String, Box<EvalAltResult>> {
            let bytes = STANDARD
                .decode(text.trim())
                .map_err(|e| invalid_arg(&format!("invalid base64: {}", e)))?;
            String::from_utf8(bytes).map_err(|_| invalid_arg("decoded base64 is not UTF-8"))
        },
    );

    // RAND(): random float in [0.0, 1.0)
    engine.register_fn("RAND", || -> f64 { rand::thread_rng().r#gen() });

    // RANDINT(min, max): random integer in [min, max] inclusive
    engine.register_fn(
        "RANDINT",
        |min: i64, max: i64| -> Result<i64, Box<EvalAltResult>> {
            if min > max {
                return Err(invalid_arg("RANDINT min must be <= max"));
            }
            Ok(rand::thread_rng().gen_range(min..=max))
        },
    );

    engine.register_fn("NOW", || -> String {
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    });
    engine.register_fn("TODAY", || -> String {
        chrono::Local::now().format("%Y-%m-%d").to_string()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{GridAccess, RESERVED_NAMES};
    use std::collections::HashMap;
    use std::sync::{Arc, Weak};

    #[derive(Default)]
    struct MapGrid {
        values: HashMap<Key, CellValue>,
        codes: HashMap<Key, String>,
    }

    impl GridAccess for MapGrid {
        fn value(&self, key: Key) -> Result<Option<CellValue>, EvalError> {
            Ok(self.values.get(&key).cloned())
        }

        fn code(&self, key: Key) -> Option<String> {
            self.codes.get(&key).cloned()
        }

        fn shape(&self) -> Shape {
            Shape::new(4, 3, 2)
        }
    }

    fn engine_with(grid: &Arc<MapGrid>) -> (Engine, rhai::Scope<'static>) {
        let mut engine = Engine::new();
        register_builtins(&mut engine, &Arc::default());
        let weak: Weak<dyn GridAccess> = Arc::downgrade(grid) as Weak<dyn GridAccess>;
        let mut scope = rhai::Scope::new();
        assert!(RESERVED_NAMES.contains(&"S"));
        scope.push_constant("S", GridHandle::new(weak, 0));
        (engine, scope)
    }

    fn number(n: i64) -> CellValue {
        CellValue::Value(Dynamic::from_int(n))
    }

    #[test]
    fn test_cell_reads_values_and_empty_cells() {
        let mut grid = MapGrid::default();
        grid.values.insert(Key::new(1, 1, 0), number(7));
        grid.values.insert(Key::new(3, 2, 1), number(9));
        let grid = Arc::new(grid);
        let (engine, mut scope) = engine_with(&grid);

        let v: i64 = engine.eval_with_scope(&mut scope, "S.cell(1, 1)").unwrap();
        assert_eq!(v, 7);
        let v: i64 = engine.eval_with_scope(&mut scope, "S.cell(-1, -1, 1)").unwrap();
        assert_eq!(v, 9);
        let empty: Dynamic = engine.eval_with_scope(&mut scope, "S.cell(0, 0)").unwrap();
        assert!(empty.is_unit());
    }

    #[test]
    fn test_cell_rejects_out_of_range_indices() {
        let grid = Arc::new(MapGrid::default());
        let (engine, mut scope) = engine_with(&grid);
        assert!(engine.eval_with_scope::<Dynamic>(&mut scope, "S.cell(4, 0)").is_err());
        assert!(engine.eval_with_scope::<Dynamic>(&mut scope, "S.cell(0, -4)").is_err());
    }

    #[test]
    fn test_error_cells_raise() {
        let mut grid = MapGrid::default();
        grid.values.insert(
            Key::new(0, 0, 0),
            CellValue::Error(EvalError::runtime("boom")),
        );
        let grid = Arc::new(grid);
        let (engine, mut scope) = engine_with(&grid);
        let err = engine
            .eval_with_scope::<Dynamic>(&mut scope, "S.cell(0, 0)")
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_block_and_sum() {
        let mut grid = MapGrid::default();
        grid.values.insert(Key::new(0, 0, 0), number(1));
        grid.values.insert(Key::new(0, 1, 0), number(2));
        grid.values.insert(Key::new(1, 0, 0), CellValue::Value(Dynamic::from_float(0.5)));
        let grid = Arc::new(grid);
        let (engine, mut scope) = engine_with(&grid);

        let rows: Array = engine
            .eval_with_scope(&mut scope, "S.block(0, 0, 1, 1)")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].clone().into_array().unwrap().len(), 2);

        let total: f64 = engine
            .eval_with_scope(&mut scope, "sum(S.block(0, 0, 1, 1))")
            .unwrap();
        assert_eq!(total, 3.5);
    }

    #[test]
    fn test_code_and_shape() {
        let mut grid = MapGrid::default();
        grid.codes.insert(Key::new(2, 1, 0), "1 + 1".to_string());
        let grid = Arc::new(grid);
        let (engine, mut scope) = engine_with(&grid);
        let code: String = engine.eval_with_scope(&mut scope, "S.code(2, 1)").unwrap();
        assert_eq!(code, "1 + 1");
        let shape: Array = engine.eval_with_scope(&mut scope, "S.shape").unwrap();
        let shape: Vec<i64> = shape.into_iter().map(|v| v.as_int().unwrap()).collect();
        assert_eq!(shape, vec![4, 3, 2]);
    }

    #[test]
    fn test_nn_flattens_and_drops_units() {
        let grid = Arc::new(MapGrid::default());
        let (engine, mut scope) = engine_with(&grid);
        let flat: Array = engine
            .eval_with_scope(&mut scope, "nn([[1, ()], [2, [3]]])")
            .unwrap();
        let flat: Vec<i64> = flat.into_iter().map(|v| v.as_int().unwrap()).collect();
        assert_eq!(flat, vec![1, 2, 3]);
    }

    #[test]
    fn test_arange_variants() {
        let grid = Arc::new(MapGrid::default());
        let (engine, mut scope) = engine_with(&grid);
        let a: Array = engine.eval_with_scope(&mut scope, "arange(3)").unwrap();
        assert_eq!(a.len(), 3);
        let a: Array = engine.eval_with_scope(&mut scope, "arange(10, 0, -4)").unwrap();
        let a: Vec<i64> = a.into_iter().map(|v| v.as_int().unwrap()).collect();
        assert_eq!(a, vec![10, 6, 2]);
        assert!(engine.eval_with_scope::<Array>(&mut scope, "arange(0, 5, 0)").is_err());
    }

    #[test]
    fn test_arange_stops_before_overflow() {
        let grid = Arc::new(MapGrid::default());
        let (engine, mut scope) = engine_with(&grid);
        let a: Array = engine
            .eval_with_scope(&mut scope, "arange(1, 9223372036854775807, 9223372036854775807)")
            .unwrap();
        assert_eq!(a.len(), 1);
        let a: Array = engine
            .eval_with_scope(&mut scope, "arange(-2, -9223372036854775807 - 1, -9223372036854775807)")
            .unwrap();
        let a: Vec<i64> = a.into_iter().map(|v| v.as_int().unwrap()).collect();
        assert_eq!(a, vec![-2]);
    }

    #[test]
    fn test_arange_rejects_huge_ranges() {
        let grid = Arc::new(MapGrid::default());
        let (engine, mut scope) = engine_with(&grid);
        let err = engine
            .eval_with_scope::<Array>(&mut scope, "arange(0, 9223372036854775807)")
            .unwrap_err();
        assert!(err.to_string().contains("limit is"));
    }

    #[test]
    fn test_native_loops_stop_at_deadline() {
        let mut engine = Engine::new();
        let deadline = Arc::new(Deadline::default());
        register_builtins(&mut engine, &deadline);
        let _guard = deadline.enter(std::time::Duration::ZERO);
        for script in ["arange(0, 100000)", "sum([[1, 2], [3]])", "nn([1, [2]])"] {
            let err = engine.eval::<Dynamic>(script).unwrap_err();
            assert!(
                matches!(*err, EvalAltResult::ErrorTerminated(..))
                    || matches!(&*err, EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
                        if matches!(**inner, EvalAltResult::ErrorTerminated(..))),
                "{}: {}",
                script,
                err
            );
        }
    }

    #[test]
    fn test_chart_with_axis_labels() {
        let grid = Arc::new(MapGrid::default());
        let (engine, mut scope) = engine_with(&grid);
        let encoded: String = engine
            .eval_with_scope(
                &mut scope,
                "S.chart(\"line\", 0, 0, 3, 0, \"Sales\", \"Month\", \"EUR\")",
            )
            .unwrap();
        let spec = ChartSpec::parse(&encoded).unwrap();
        assert_eq!(spec.kind, ChartKind::Line);
        assert_eq!(spec.title.as_deref(), Some("Sales"));
        assert_eq!(spec.x_label.as_deref(), Some("Month"));
        assert_eq!(spec.y_label.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_chart_returns_tagged_string() {
        let grid = Arc::new(MapGrid::default());
        let (engine, mut scope) = engine_with(&grid);
        let spec: String = engine
            .eval_with_scope(&mut scope, "S.chart(\"bar\", 0, 0, 3, 0)")
            .unwrap();
        assert_eq!(spec, "@CHART:BAR:0,0,3,0,0");
    }

    #[test]
    fn test_base64_helpers() {
        let grid = Arc::new(MapGrid::default());
        let (engine, mut scope) = engine_with(&grid);
        let encoded: String = engine
            .eval_with_scope(&mut scope, "b64encode(\"tabula\")")
            .unwrap();
        assert_eq!(encoded, "dGFidWxh");
        let decoded: String = engine
            .eval_with_scope(&mut scope, "b64decode(\"dGFidWxh\")")
            .unwrap();
        assert_eq!(decoded, "tabula");
        assert!(engine.eval_with_scope::<String>(&mut scope, "b64decode(\"@@\")").is_err());
    }

    #[test]
    fn test_rand_returns_value_in_range() {
        let mut engine = Engine::new();
        register_builtins(&mut engine, &Arc::default());
        for _ in 0..100 {
            let result: f64 = engine.eval("RAND()").unwrap();
            assert!((0.0..1.0).contains(&result));
        }
    }

    #[test]
    fn test_randint_returns_value_in_range() {
        let mut engine = Engine::new();
        register_builtins(&mut engine, &Arc::default());
        for _ in 0..100 {
            let result: i64 = engine.eval("RANDINT(1, 6)").unwrap();
            assert!((1..=6).contains(&result));
        }
        assert!(engine.eval::<i64>("RANDINT(6, 1)").is_err());
    }

    #[test]
    fn test_today_is_a_date() {
        let mut engine = Engine::new();
        register_builtins(&mut engine, &Arc::default());
        let today: String = engine.eval("TODAY()").unwrap();
        assert_eq!(today.len(), 10);
        assert!(chrono::NaiveDate::parse_from_str(&today, "%Y-%m-%d").is_ok());
    }
}
