//! The bundled introspection query.
//!
//! One SELECT over `pg_catalog`, returning at most one row with a single
//! JSON column matching [`crate::Schema`]'s shape. The proxy runs it on the
//! proxied server connection itself, so the whole schema must arrive in one
//! round-trip.

use electric_core::TableName;

/// Build the introspection query for one table.
///
/// Returns zero rows when the table does not exist; the caller maps that to
/// its introspection-failure error.
pub fn introspection_query(table: &TableName) -> String {
    let schema = sql_literal(&table.schema);
    let name = sql_literal(&table.name);
    format!(
        r#"SELECT json_build_object(
  'schema', n.nspname,
  'name', c.relname,
  'electrified', EXISTS (
    SELECT 1 FROM electric.electrified e
    WHERE e.schema_name = n.nspname AND e.table_name = c.relname
  ),
  'columns', COALESCE((
    SELECT json_agg(json_build_object(
      'name', a.attname,
      'data_type', pg_catalog.format_type(a.atttypid, a.atttypmod),
      'nullable', NOT a.attnotnull,
      'default', pg_catalog.pg_get_expr(ad.adbin, ad.adrelid)
    ) ORDER BY a.attnum)
    FROM pg_catalog.pg_attribute a
    LEFT JOIN pg_catalog.pg_attrdef ad
      ON ad.adrelid = a.attrelid AND ad.adnum = a.attnum
    WHERE a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
  ), '[]'::json),
  'primary_key', COALESCE((
    SELECT json_agg(a.attname ORDER BY k.ord)
    FROM pg_catalog.pg_constraint pk
    CROSS JOIN LATERAL unnest(pk.conkey) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_catalog.pg_attribute a
      ON a.attrelid = c.oid AND a.attnum = k.attnum
    WHERE pk.conrelid = c.oid AND pk.contype = 'p'
  ), '[]'::json),
  'foreign_keys', COALESCE((
    SELECT json_agg(json_build_object(
      'columns', (
        SELECT json_agg(a.attname ORDER BY k.ord)
        FROM unnest(fk.conkey) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_catalog.pg_attribute a
          ON a.attrelid = fk.conrelid AND a.attnum = k.attnum
      ),
      'references', json_build_object(
        'schema', fn.nspname,
        'table', fc.relname,
        'columns', (
          SELECT json_agg(a.attname ORDER BY k.ord)
          FROM unnest(fk.confkey) WITH ORDINALITY AS k(attnum, ord)
          JOIN pg_catalog.pg_attribute a
            ON a.attrelid = fk.confrelid AND a.attnum = k.attnum
        )
      ),
      'on_delete', fk.confdeltype,
      'on_update', fk.confupdtype
    ))
    FROM pg_catalog.pg_constraint fk
    JOIN pg_catalog.pg_class fc ON fc.oid = fk.confrelid
    JOIN pg_catalog.pg_namespace fn ON fn.oid = fc.relnamespace
    WHERE fk.conrelid = c.oid AND fk.contype = 'f'
  ), '[]'::json)
)::text
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = {schema} AND c.relname = {name} AND c.relkind IN ('r', 'p')"#
    )
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
