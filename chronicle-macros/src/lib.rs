//! Proc macros for chronicle extraction schemas.
//!
//! Provides `#[derive(Schema)]` to generate JSON schemas from the struct
//! definitions the extraction service must fill in, and optionally a tool
//! definition that forces the model to answer with that structure.
//!
//! # Example
//!
//! ```ignore
//! /// Record everything extracted from one chapter
//! #[derive(Schema, Deserialize)]
//! #[schema(tool = "record_chapter")]
//! struct ChapterBatch {
//!     /// Events that happened in the chapter
//!     #[serde(default)]
//!     events: Vec<ExtractedEvent>,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::{parse_macro_input, Attribute, DeriveInput, Field, GenericArgument, Lit, LitStr, Meta, PathArguments, Type};

/// Derive macro implementing `chronicle_core::schema::JsonSchema`.
///
/// # Attributes
///
/// - `#[schema(tool = "...")]` on the struct - Also generate `tool_name()` and `as_tool()`
/// - `#[schema(optional)]` on fields - Leave the field out of `required`
/// - `#[schema(rename = "...")]` on fields - Override the field name in the schema
///
/// `#[serde(rename = "...")]` and `#[serde(default)]` are honoured as well, so the
/// schema matches what deserialization actually accepts.
#[proc_macro_derive(Schema, attributes(schema))]
pub fn derive_schema(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_schema(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand_schema(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let tool_name = get_tool_name(&input.attrs)?;
    let description = get_doc_comment(&input.attrs);

    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Schema derive only supports structs with named fields",
                ))
            }
        },
        _ => return Err(syn::Error::new_spanned(input, "Schema derive only supports structs")),
    };

    let mut property_tokens = Vec::new();
    let mut required_fields = Vec::new();

    for field in fields {
        let options = FieldOptions::parse(field)?;
        let field_desc = get_doc_comment(&field.attrs);
        let type_schema = type_to_schema(&field.ty);
        let field_name_str = options.name;

        let desc_token = if field_desc.is_empty() {
            quote! {}
        } else {
            quote! { property["description"] = serde_json::json!(#field_desc); }
        };

        property_tokens.push(quote! {
            {
                let mut property = #type_schema;
                #desc_token
                properties.insert(#field_name_str.to_string(), property);
            }
        });

        if !options.optional && !is_option_type(&field.ty) {
            required_fields.push(field_name_str);
        }
    }

    let desc_token = if description.is_empty() {
        quote! {}
    } else {
        quote! { schema["description"] = serde_json::json!(#description); }
    };

    let tool_tokens = match tool_name {
        Some(tool_name) => quote! {
            impl #struct_name {
                /// Name of the tool the extraction service is forced to call.
                pub fn tool_name() -> &'static str {
                    #tool_name
                }

                /// Tool definition whose input schema is this struct.
                pub fn as_tool() -> ::claude::Tool {
                    ::claude::Tool {
                        name: Self::tool_name().to_string(),
                        description: #description.to_string(),
                        input_schema: <Self as ::chronicle_core::schema::JsonSchema>::json_schema(),
                    }
                }
            }
        },
        None => quote! {},
    };

    Ok(quote! {
        impl ::chronicle_core::schema::JsonSchema for #struct_name {
            fn json_schema() -> serde_json::Value {
                let mut properties = serde_json::Map::new();
                #(#property_tokens)*

                let required: Vec<&str> = vec![#(#required_fields),*];

                let mut schema = serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required
                });
                #desc_token
                schema
            }
        }

        #tool_tokens
    })
}

fn get_tool_name(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut tool = None;
    for attr in attrs {
        if attr.path().is_ident("schema") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("tool") {
                    let s: LitStr = meta.value()?.parse()?;
                    tool = Some(s.value());
                    Ok(())
                } else {
                    Err(meta.error("unsupported schema attribute on struct"))
                }
            })?;
        }
    }
    Ok(tool)
}

struct FieldOptions {
    name: String,
    optional: bool,
}

impl FieldOptions {
    fn parse(field: &Field) -> syn::Result<Self> {
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;
        let mut options = FieldOptions {
            name: ident.to_string().trim_start_matches("r#").to_string(),
            optional: false,
        };
        let mut schema_rename = None;

        for attr in &field.attrs {
            if attr.path().is_ident("schema") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("optional") {
                        options.optional = true;
                        Ok(())
                    } else if meta.path.is_ident("rename") {
                        let s: LitStr = meta.value()?.parse()?;
                        schema_rename = Some(s.value());
                        Ok(())
                    } else {
                        Err(meta.error("unsupported schema attribute on field"))
                    }
                })?;
            } else if attr.path().is_ident("serde") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("default") {
                        options.optional = true;
                        skip_meta_value(&meta)
                    } else if meta.path.is_ident("rename") && meta.input.peek(syn::Token![=]) {
                        let s: LitStr = meta.value()?.parse()?;
                        options.name = s.value();
                        Ok(())
                    } else {
                        skip_meta_value(&meta)
                    }
                })?;
            }
        }

        // An explicit schema rename wins over serde's.
        if let Some(name) = schema_rename {
            options.name = name;
        }
        Ok(options)
    }
}

/// Consume whatever follows a serde attribute key we do not care about.
fn skip_meta_value(meta: &ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(syn::Token![=]) {
        let _: syn::Expr = meta.value()?.parse()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        let _: TokenStream2 = content.parse()?;
    }
    Ok(())
}

fn get_doc_comment(attrs: &[Attribute]) -> String {
    let mut docs = Vec::new();
    for attr in attrs {
        if attr.path().is_ident("doc") {
            if let Meta::NameValue(nv) = &attr.meta {
                if let syn::Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Str(s) = &expr_lit.lit {
                        docs.push(s.value().trim().to_string());
                    }
                }
            }
        }
    }
    docs.join(" ")
}

fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}

/// The `n`th generic type argument of a path segment like `Vec<T>` or `BTreeMap<K, V>`.
fn generic_arg(arguments: &PathArguments, n: usize) -> Option<&Type> {
    if let PathArguments::AngleBracketed(args) = arguments {
        args.args
            .iter()
            .filter_map(|arg| match arg {
                GenericArgument::Type(ty) => Some(ty),
                _ => None,
            })
            .nth(n)
    } else {
        None
    }
}

fn type_to_schema(ty: &Type) -> TokenStream2 {
    let Type::Path(type_path) = ty else {
        return quote! { serde_json::json!({}) };
    };
    let Some(segment) = type_path.path.segments.last() else {
        return quote! { serde_json::json!({}) };
    };

    match segment.ident.to_string().as_str() {
        "String" | "str" => quote! { serde_json::json!({"type": "string"}) },
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! { serde_json::json!({"type": "integer"}) }
        }
        "f32" | "f64" => quote! { serde_json::json!({"type": "number"}) },
        "bool" => quote! { serde_json::json!({"type": "boolean"}) },
        // Free-form: the merge layer validates these values itself.
        "Value" => quote! { serde_json::json!({}) },
        "Option" | "Box" => match generic_arg(&segment.arguments, 0) {
            Some(inner) => type_to_schema(inner),
            None => quote! { serde_json::json!({}) },
        },
        "Vec" | "BTreeSet" | "HashSet" => match generic_arg(&segment.arguments, 0) {
            Some(inner) => {
                let inner_schema = type_to_schema(inner);
                quote! {
                    serde_json::json!({
                        "type": "array",
                        "items": #inner_schema
                    })
                }
            }
            None => quote! { serde_json::json!({"type": "array"}) },
        },
        "BTreeMap" | "HashMap" => match generic_arg(&segment.arguments, 1) {
            Some(value) => {
                let value_schema = type_to_schema(value);
                quote! {
                    serde_json::json!({
                        "type": "object",
                        "additionalProperties": #value_schema
                    })
                }
            }
            None => quote! { serde_json::json!({"type": "object"}) },
        },
        _ => quote! { <#ty as ::chronicle_core::schema::JsonSchema>::json_schema() },
    }
}
