//! # Graphops Procedural Macros
//!
//! Code generation behind the Graphops plugin SDK. Plugins should use these
//! through the re-exports in the `graphops` crate.
//!
//! - `#[task]` registers an async task handler
//! - `#[trigger]` registers an async polling trigger
//! - `#[init]` / `#[shutdown]` register lifecycle hooks
//! - `define_credential!` declares a credential the host renders
//!
//! Task and trigger metadata comes from structured doc comments:
//!
//! ```ignore
//! /// # Upload File (ID: upload)
//! ///
//! /// Uploads a file to OneDrive or SharePoint.
//! ///
//! /// ## Tags
//! /// - files
//! #[task]
//! async fn upload(ctx: Context, input: UploadInput) -> Result<UploadOutput> {
//!     // ...
//! }
//! ```

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{
    Attribute, Error, Expr, FnArg, Ident, ItemFn, Lit, Meta, Result, Type, parse_macro_input,
    spanned::Spanned,
};

/// Metadata parsed from a handler's doc comments.
struct DocCommentMetadata {
    description: Option<String>,
    /// From the `(ID: custom_id)` suffix of the H1 heading.
    id: Option<String>,
    name: Option<String>,
    tags: Vec<String>,
}

fn doc_lines(attrs: &[Attribute]) -> Vec<String> {
    attrs
        .iter()
        .filter(|attr| attr.path().is_ident("doc"))
        .filter_map(|attr| {
            if let Meta::NameValue(nv) = &attr.meta
                && let Expr::Lit(lit) = &nv.value
                && let Lit::Str(s) = &lit.lit
            {
                return Some(s.value().trim().to_string());
            }
            None
        })
        .collect()
}

/// Parses `# Name (ID: id)`, the description paragraphs under it and an
/// optional `## Tags` list. Returns `None` without doc comments.
fn extract_doc_metadata(attrs: &[Attribute]) -> Option<DocCommentMetadata> {
    let lines = doc_lines(attrs);
    if lines.is_empty() {
        return None;
    }

    let mut metadata = DocCommentMetadata {
        description: None,
        id: None,
        name: None,
        tags: Vec::new(),
    };

    let mut current_section: Option<String> = None;
    let mut description_lines = Vec::new();
    let mut h1_parsed = false;

    for line in lines {
        if let Some(rest) = line.strip_prefix("# ") {
            // A second H1 ("# Errors") ends the metadata block.
            if h1_parsed {
                break;
            }
            h1_parsed = true;

            let heading = rest.trim();
            match heading.find("(ID:") {
                Some(pos) => {
                    let id = heading[pos + 4..]
                        .trim()
                        .strip_suffix(')')
                        .unwrap_or("")
                        .trim();
                    metadata.name = Some(heading[..pos].trim().to_string());
                    if !id.is_empty() {
                        metadata.id = Some(id.to_string());
                    }
                }
                None => metadata.name = Some(heading.to_string()),
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("## ") {
            current_section = Some(rest.trim().to_string());
            continue;
        }

        if let Some(rest) = line.strip_prefix('-')
            && current_section.as_deref() == Some("Tags")
        {
            metadata.tags.push(rest.trim().to_string());
            continue;
        }

        if h1_parsed && current_section.is_none() && !line.is_empty() {
            description_lines.push(line);
        }
    }

    if !description_lines.is_empty() {
        metadata.description = Some(description_lines.join("\n\n"));
    }

    Some(metadata)
}

/// Resolved display metadata shared by tasks and triggers.
struct HandlerMetadata {
    id: String,
    name: String,
    description: String,
    tags: Vec<String>,
}

fn handler_metadata(func: &ItemFn, kind: &str) -> Result<HandlerMetadata> {
    let ident = &func.sig.ident;
    let metadata = extract_doc_metadata(&func.attrs).ok_or_else(|| {
        Error::new(
            ident.span(),
            format!("{kind} must have doc comments used for metadata"),
        )
    })?;

    let name = metadata.name.ok_or_else(|| {
        Error::new(
            ident.span(),
            format!("missing {kind} name in doc comments (must be the first H1 heading)"),
        )
    })?;
    let description = metadata.description.ok_or_else(|| {
        Error::new(
            ident.span(),
            format!("missing {kind} description in doc comments (must follow H1 heading)"),
        )
    })?;

    Ok(HandlerMetadata {
        id: metadata.id.unwrap_or_else(|| ident.to_string()),
        name,
        description,
        tags: metadata.tags,
    })
}

fn typed_arg<'a>(arg: &'a FnArg, what: &str) -> Result<&'a Type> {
    match arg {
        FnArg::Typed(pat_type) => Ok(&pat_type.ty),
        FnArg::Receiver(_) => Err(Error::new(
            arg.span(),
            format!("expected typed argument for {what}"),
        )),
    }
}

/// Registers an async task handler.
///
/// The function must be `async`, take `(ctx: Context, input: Input)` and
/// return `Result<Output>`. `Input` must implement `Deserialize` and
/// `JsonSchema`; `Output` must implement `Serialize` and `JsonSchema`.
#[proc_macro_attribute]
pub fn task(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return Error::new(
            proc_macro2::Span::call_site(),
            "#[task] takes no arguments; put metadata in doc comments:\n/// # Task Name\n/// \
             Description here.\n#[task]\nasync fn my_task(...)",
        )
        .to_compile_error()
        .into();
    }

    let func = parse_macro_input!(item as ItemFn);

    match expand_task(&func) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand_task(func: &ItemFn) -> Result<proc_macro2::TokenStream> {
    let HandlerMetadata {
        id,
        name,
        description,
        tags,
    } = handler_metadata(func, "task")?;
    let sig = &func.sig;
    let func_name = &sig.ident;

    if sig.asyncness.is_none() {
        return Err(Error::new(sig.fn_token.span, "task handler must be async"));
    }

    let args: Vec<_> = sig.inputs.iter().collect();
    if args.len() != 2 {
        return Err(Error::new(
            sig.inputs.span(),
            "task handler must have exactly 2 arguments: (ctx: Context, input: Input)",
        ));
    }
    let input_type = typed_arg(args[1], "input")?;

    let output_type = match &sig.output {
        syn::ReturnType::Type(_, ty) => extract_result_ok_type(ty)?,
        syn::ReturnType::Default => {
            return Err(Error::new(
                sig.output.span(),
                "task handler must return Result<Output>",
            ));
        }
    };

    let wrapper_ident = format_ident!("__graphops_task_{}", func_name);

    Ok(quote! {
        #func

        #[doc(hidden)]
        pub fn #wrapper_ident(
            ctx: ::graphops::__private::Context,
            input_json: ::std::vec::Vec<u8>,
        ) -> ::std::pin::Pin<::std::boxed::Box<dyn ::std::future::Future<Output = ::graphops::__private::anyhow::Result<::std::vec::Vec<u8>>> + ::std::marker::Send + 'static>> {
            ::std::boxed::Box::pin(async move {
                let input: #input_type = ::graphops::__private::serde_json::from_slice(&input_json)?;
                let output = #func_name(ctx, input).await?;
                Ok(::graphops::__private::serde_json::to_vec(&output)?)
            })
        }

        ::graphops::__private::inventory::submit! {
            ::graphops::__private::TaskEntry {
                id: #id,
                name: #name,
                description: #description,
                tags: &[#(#tags),*],
                input_schema_fn: || {
                    let schema = ::graphops::__private::schemars::schema_for!(#input_type);
                    ::graphops::__private::serde_json::to_string(&schema)
                        .expect("schema serialization should never fail")
                },
                output_schema_fn: || {
                    let schema = ::graphops::__private::schemars::schema_for!(#output_type);
                    ::graphops::__private::serde_json::to_string(&schema)
                        .expect("schema serialization should never fail")
                },
                handler: #wrapper_ident,
                __sealed: ::graphops::__private::sealed(),
            }
        }
    })
}

/// Registers an async polling trigger.
///
/// The function must be `async`, take
/// `(ctx: Context, input: Input, state: TriggerState)` and return
/// `Result<Evaluation>`.
#[proc_macro_attribute]
pub fn trigger(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return Error::new(
            proc_macro2::Span::call_site(),
            "#[trigger] takes no arguments; put metadata in doc comments",
        )
        .to_compile_error()
        .into();
    }

    let func = parse_macro_input!(item as ItemFn);

    match expand_trigger(&func) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand_trigger(func: &ItemFn) -> Result<proc_macro2::TokenStream> {
    let HandlerMetadata {
        id,
        name,
        description,
        tags,
    } = handler_metadata(func, "trigger")?;
    let sig = &func.sig;
    let func_name = &sig.ident;

    if sig.asyncness.is_none() {
        return Err(Error::new(sig.fn_token.span, "trigger handler must be async"));
    }

    let args: Vec<_> = sig.inputs.iter().collect();
    if args.len() != 3 {
        return Err(Error::new(
            sig.inputs.span(),
            "trigger handler must have exactly 3 arguments: (ctx: Context, input: Input, state: \
             TriggerState)",
        ));
    }
    let input_type = typed_arg(args[1], "input")?;

    match &sig.output {
        syn::ReturnType::Type(_, ty) => {
            extract_result_ok_type(ty)?;
        }
        syn::ReturnType::Default => {
            return Err(Error::new(
                sig.output.span(),
                "trigger handler must return Result<Evaluation>",
            ));
        }
    }

    let wrapper_ident = format_ident!("__graphops_trigger_{}", func_name);

    Ok(quote! {
        #func

        #[doc(hidden)]
        pub fn #wrapper_ident(
            ctx: ::graphops::__private::Context,
            input_json: ::std::vec::Vec<u8>,
            state: ::graphops::__private::TriggerState,
        ) -> ::std::pin::Pin<::std::boxed::Box<dyn ::std::future::Future<Output = ::graphops::__private::anyhow::Result<::graphops::__private::Evaluation>> + ::std::marker::Send + 'static>> {
            ::std::boxed::Box::pin(async move {
                let input: #input_type = ::graphops::__private::serde_json::from_slice(&input_json)?;
                Ok(#func_name(ctx, input, state).await?)
            })
        }

        ::graphops::__private::inventory::submit! {
            ::graphops::__private::TriggerEntry {
                id: #id,
                name: #name,
                description: #description,
                tags: &[#(#tags),*],
                input_schema_fn: || {
                    let schema = ::graphops::__private::schemars::schema_for!(#input_type);
                    ::graphops::__private::serde_json::to_string(&schema)
                        .expect("schema serialization should never fail")
                },
                handler: #wrapper_ident,
                __sealed: ::graphops::__private::sealed(),
            }
        }
    })
}

/// Registers an async function run once when the plugin is loaded.
#[proc_macro_attribute]
pub fn init(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let func = parse_macro_input!(item as ItemFn);

    match expand_init(&func) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand_init(func: &ItemFn) -> Result<proc_macro2::TokenStream> {
    let sig = &func.sig;
    let func_name = &sig.ident;
    let func_name_str = func_name.to_string();

    if sig.asyncness.is_none() {
        return Err(Error::new(sig.fn_token.span, "init function must be async"));
    }
    if !sig.inputs.is_empty() {
        return Err(Error::new(
            sig.inputs.span(),
            "init function must have no parameters",
        ));
    }

    let wrapper_ident = format_ident!("__graphops_init_{}", func_name);

    Ok(quote! {
        #func

        #[doc(hidden)]
        pub fn #wrapper_ident(
        ) -> ::std::pin::Pin<::std::boxed::Box<dyn ::std::future::Future<Output = ::graphops::__private::anyhow::Result<()>> + ::std::marker::Send + 'static>> {
            ::std::boxed::Box::pin(async move {
                #func_name().await
            })
        }

        ::graphops::__private::inventory::submit! {
            ::graphops::__private::InitEntry {
                name: #func_name_str,
                handler: #wrapper_ident,
                __sealed: ::graphops::__private::sealed(),
            }
        }
    })
}

/// Registers a synchronous function run when the plugin is unloaded.
#[proc_macro_attribute]
pub fn shutdown(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let func = parse_macro_input!(item as ItemFn);

    match expand_shutdown(&func) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand_shutdown(func: &ItemFn) -> Result<proc_macro2::TokenStream> {
    let sig = &func.sig;
    let func_name = &sig.ident;
    let func_name_str = func_name.to_string();

    if sig.asyncness.is_some() {
        return Err(Error::new(
            sig.fn_token.span,
            "shutdown function must be synchronous (not async)",
        ));
    }
    if !sig.inputs.is_empty() {
        return Err(Error::new(
            sig.inputs.span(),
            "shutdown function must have no parameters",
        ));
    }

    Ok(quote! {
        #func

        ::graphops::__private::inventory::submit! {
            ::graphops::__private::ShutdownEntry {
                name: #func_name_str,
                handler: #func_name,
                __sealed: ::graphops::__private::sealed(),
            }
        }
    })
}

/// Extracts `T` from `Result<T>` or `Result<T, E>`.
fn extract_result_ok_type(ty: &Type) -> Result<&Type> {
    let Type::Path(type_path) = ty else {
        return Err(Error::new(ty.span(), "expected Result<T, E> return type"));
    };

    let segment = type_path
        .path
        .segments
        .last()
        .ok_or_else(|| Error::new(ty.span(), "expected Result<T, E> return type"))?;
    if segment.ident != "Result" {
        return Err(Error::new(ty.span(), "expected Result<T, E> return type"));
    }

    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return Err(Error::new(
            ty.span(),
            "expected Result<T, E> with type arguments",
        ));
    };

    match args.args.first() {
        Some(syn::GenericArgument::Type(t)) => Ok(t),
        Some(_) => Err(Error::new(ty.span(), "expected type argument")),
        None => Err(Error::new(ty.span(), "Result must have type arguments")),
    }
}

/// Declares a credential the host renders into the `Context`.
///
/// ```ignore
/// define_credential! {
///     /// Microsoft identity platform credential
///     MicrosoftCredential("microsoft") {
///         /// Pre-acquired bearer token
///         #[optional]
///         #[secret]
///         access_token: Option<String>,
///         #[optional]
///         tenant_id: Option<String>,
///     }
/// }
/// ```
///
/// Generates a struct with public fields, a `get(&Context)` constructor, a
/// `Debug` impl that masks `#[secret]` fields and a registry entry.
#[proc_macro]
pub fn define_credential(input: TokenStream) -> TokenStream {
    let def = parse_macro_input!(input as CredentialDef);
    expand_credential(&def).into()
}

struct CredentialDef {
    description: Option<String>,
    struct_name: Ident,
    /// Name the host renders the credential under.
    cred_name: String,
    fields: Vec<CredentialField>,
}

struct CredentialField {
    name: Ident,
    ty: Type,
    optional: bool,
    secret: bool,
    description: Option<String>,
}

impl syn::parse::Parse for CredentialDef {
    fn parse(input: syn::parse::ParseStream) -> Result<Self> {
        // /// doc
        // StructName("cred_name") { fields... }
        let outer = input.call(Attribute::parse_outer)?;
        let description = Some(doc_lines(&outer).join(" ")).filter(|d| !d.is_empty());

        let struct_name: Ident = input.parse()?;

        let content;
        syn::parenthesized!(content in input);
        let cred_name: syn::LitStr = content.parse()?;

        let fields_content;
        syn::braced!(fields_content in input);

        let mut fields = Vec::new();
        while !fields_content.is_empty() {
            let attrs = fields_content.call(Attribute::parse_outer)?;
            let optional = attrs.iter().any(|a| a.path().is_ident("optional"));
            let secret = attrs.iter().any(|a| a.path().is_ident("secret"));
            let description = Some(doc_lines(&attrs).join(" ")).filter(|d| !d.is_empty());

            let name: Ident = fields_content.parse()?;
            fields_content.parse::<syn::Token![:]>()?;
            let ty: Type = fields_content.parse()?;

            if fields_content.peek(syn::Token![,]) {
                fields_content.parse::<syn::Token![,]>()?;
            }

            fields.push(CredentialField {
                name,
                ty,
                optional,
                secret,
                description,
            });
        }

        Ok(Self {
            description,
            struct_name,
            cred_name: cred_name.value(),
            fields,
        })
    }
}

fn expand_credential(def: &CredentialDef) -> proc_macro2::TokenStream {
    let struct_name = &def.struct_name;
    let struct_name_str = struct_name.to_string();
    let cred_name = &def.cred_name;
    let description = def
        .description
        .clone()
        .unwrap_or_else(|| format!("Credential: {cred_name}"));

    let field_names: Vec<_> = def.fields.iter().map(|f| &f.name).collect();
    let field_types: Vec<_> = def.fields.iter().map(|f| &f.ty).collect();

    let field_schema_entries = def.fields.iter().map(|f| {
        let name_str = f.name.to_string();
        let required = !f.optional;
        let secret = f.secret;
        let desc = f.description.as_deref().unwrap_or("");
        quote! {
            (#name_str, ::graphops::__private::CredentialFieldSchema {
                description: #desc,
                required: #required,
                secret: #secret,
            })
        }
    });

    let debug_fields = def.fields.iter().map(|f| {
        let name = &f.name;
        let name_str = name.to_string();
        if f.secret {
            quote! { .field(#name_str, &"***") }
        } else {
            quote! { .field(#name_str, &self.#name) }
        }
    });

    quote! {
        #[derive(Clone, ::graphops::__private::serde::Deserialize)]
        #[serde(crate = "::graphops::__private::serde")]
        pub struct #struct_name {
            #(pub #field_names: #field_types,)*
        }

        impl #struct_name {
            /// Reads the credential rendered by the host.
            ///
            /// # Errors
            ///
            /// Returns an error if the credential is missing or malformed.
            pub fn get(ctx: &::graphops::__private::Context) -> ::std::result::Result<Self, ::graphops::CredentialError> {
                ctx.credential(#cred_name)
            }
        }

        impl ::std::fmt::Debug for #struct_name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.debug_struct(#struct_name_str)
                    #(#debug_fields)*
                    .finish()
            }
        }

        ::graphops::__private::inventory::submit! {
            ::graphops::__private::CredentialEntry {
                name: #cred_name,
                description: #description,
                fields: &[#(#field_schema_entries,)*],
                __sealed: ::graphops::__private::sealed(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use quote::quote;

    use super::*;

    fn strip_whitespace(input: &str) -> String {
        input.chars().filter(|c| !c.is_whitespace()).collect()
    }

    fn parse_item_fn(tokens: proc_macro2::TokenStream) -> ItemFn {
        syn::parse2(tokens).expect("failed to parse ItemFn")
    }

    fn parse_credential_def(tokens: proc_macro2::TokenStream) -> CredentialDef {
        syn::parse2(tokens).expect("failed to parse CredentialDef")
    }

    #[test]
    fn test_extract_doc_metadata_full() {
        let item = parse_item_fn(quote! {
            /// # Upload File (ID: upload)
            ///
            /// Uploads a file.
            ///
            /// Large files use an upload session.
            ///
            /// ## Tags
            /// - files
            /// - onedrive
            fn f() {}
        });

        let metadata = extract_doc_metadata(&item.attrs).unwrap();

        assert_eq!(metadata.name.as_deref(), Some("Upload File"));
        assert_eq!(metadata.id.as_deref(), Some("upload"));
        assert_eq!(
            metadata.description.as_deref(),
            Some("Uploads a file.\n\nLarge files use an upload session.")
        );
        assert_eq!(metadata.tags, vec!["files", "onedrive"]);
    }

    #[test]
    fn test_extract_doc_metadata_stops_at_second_heading() {
        let item = parse_item_fn(quote! {
            /// # List Items
            ///
            /// Lists folder children.
            ///
            /// # Errors
            ///
            /// Fails when the folder does not exist.
            fn f() {}
        });

        let metadata = extract_doc_metadata(&item.attrs).unwrap();

        assert_eq!(metadata.name.as_deref(), Some("List Items"));
        assert!(metadata.id.is_none());
        assert_eq!(metadata.description.as_deref(), Some("Lists folder children."));
    }

    #[test]
    fn test_expand_task_without_doc_comments_returns_error() {
        let func = parse_item_fn(quote!(
            async fn list(ctx: Context, input: Input) -> Result<Output> {}
        ));

        let err = expand_task(&func).expect_err("expected metadata error");

        assert_eq!(
            err.to_string(),
            "task must have doc comments used for metadata"
        );
    }

    #[test]
    fn test_expand_task_requires_description() {
        let func = parse_item_fn(quote!(
            /// # List
            async fn list(ctx: Context, input: Input) -> Result<Output> {}
        ));

        let err = expand_task(&func).expect_err("expected description error");

        assert_eq!(
            err.to_string(),
            "missing task description in doc comments (must follow H1 heading)"
        );
    }

    #[test]
    fn test_expand_task_requires_async_function() {
        let func = parse_item_fn(quote!(
            /// # List
            /// Description.
            fn list(ctx: Context, input: Input) -> Result<Output> {}
        ));

        let err = expand_task(&func).expect_err("expected asyncness error");

        assert_eq!(err.to_string(), "task handler must be async");
    }

    #[test]
    fn test_expand_task_requires_exactly_two_arguments() {
        let func = parse_item_fn(quote!(
            /// # List
            /// Description.
            async fn list(ctx: Context) -> Result<Output> {}
        ));

        let err = expand_task(&func).expect_err("expected argument-count error");

        assert_eq!(
            err.to_string(),
            "task handler must have exactly 2 arguments: (ctx: Context, input: Input)"
        );
    }

    #[test]
    fn test_expand_task_requires_result_return_type() {
        let func = parse_item_fn(quote!(
            /// # List
            /// Description.
            async fn list(ctx: Context, input: Input) -> Output {}
        ));

        let err = expand_task(&func).expect_err("expected Result return type error");

        assert_eq!(err.to_string(), "expected Result<T, E> return type");
    }

    #[test]
    fn test_expand_task_happy_path_registers_entry() {
        // Arrange
        let func = parse_item_fn(quote!(
            /// # Delete Item
            ///
            /// Deletes a drive item.
            ///
            /// ## Tags
            /// - files
            async fn delete(ctx: Context, input: Input) -> Result<Output> {}
        ));

        // Act
        let expanded = expand_task(&func).expect("expected expansion to succeed");

        // Assert
        let expanded = strip_whitespace(&expanded.to_string());
        assert!(expanded.contains("pubfn__graphops_task_delete"));
        assert!(expanded.contains("TaskEntry"));
        assert!(expanded.contains("id:\"delete\""));
        assert!(expanded.contains("name:\"DeleteItem\""));
        assert!(expanded.contains("description:\"Deletesadriveitem.\""));
        assert!(expanded.contains("tags:&[\"files\"]"));
        assert!(expanded.contains("schema_for!(Output)"));
    }

    #[test]
    fn test_expand_trigger_requires_three_arguments() {
        let func = parse_item_fn(quote!(
            /// # New Files
            /// Description.
            async fn new_files(ctx: Context, input: Input) -> Result<Evaluation> {}
        ));

        let err = expand_trigger(&func).expect_err("expected argument-count error");

        assert!(err.to_string().starts_with("trigger handler must have exactly 3 arguments"));
    }

    #[test]
    fn test_expand_trigger_happy_path_registers_entry() {
        let func = parse_item_fn(quote!(
            /// # New Files (ID: new_files)
            ///
            /// Fires on new files.
            async fn watch(ctx: Context, input: Input, state: TriggerState) -> Result<Evaluation> {}
        ));

        let expanded = expand_trigger(&func).expect("expected expansion to succeed");

        let expanded = strip_whitespace(&expanded.to_string());
        assert!(expanded.contains("pubfn__graphops_trigger_watch"));
        assert!(expanded.contains("TriggerEntry"));
        assert!(expanded.contains("id:\"new_files\""));
        assert!(expanded.contains("watch(ctx,input,state)"));
    }

    #[test]
    fn test_expand_init_requires_async_function() {
        let func = parse_item_fn(quote!(
            fn setup() -> Result<()> {}
        ));

        let err = expand_init(&func).expect_err("expected asyncness error");

        assert_eq!(err.to_string(), "init function must be async");
    }

    #[test]
    fn test_expand_init_requires_no_parameters() {
        let func = parse_item_fn(quote!(
            async fn setup(ctx: Context) -> Result<()> {}
        ));

        let err = expand_init(&func).expect_err("expected parameter error");

        assert_eq!(err.to_string(), "init function must have no parameters");
    }

    #[test]
    fn test_expand_init_happy_path_registers_init_entry() {
        let func = parse_item_fn(quote!(
            async fn setup() -> Result<()> {}
        ));

        let expanded = expand_init(&func).expect("expected init expansion to succeed");

        let expanded = strip_whitespace(&expanded.to_string());
        assert!(expanded.contains("pubfn__graphops_init_setup"));
        assert!(expanded.contains("InitEntry"));
        assert!(expanded.contains("name:\"setup\""));
    }

    #[test]
    fn test_expand_shutdown_rejects_async_functions() {
        let func = parse_item_fn(quote!(
            async fn cleanup() {}
        ));

        let err = expand_shutdown(&func).expect_err("expected async rejection");

        assert_eq!(
            err.to_string(),
            "shutdown function must be synchronous (not async)"
        );
    }

    #[test]
    fn test_expand_shutdown_happy_path_registers_shutdown_entry() {
        let func = parse_item_fn(quote!(
            fn cleanup() {}
        ));

        let expanded = expand_shutdown(&func).expect("expected shutdown expansion to succeed");

        let expanded = strip_whitespace(&expanded.to_string());
        assert!(expanded.contains("ShutdownEntry"));
        assert!(expanded.contains("handler:cleanup"));
    }

    #[test]
    fn test_extract_result_ok_type_accepts_single_argument_alias() {
        let ty: Type = syn::parse2(quote!(Result<Output>)).unwrap();

        let ok = extract_result_ok_type(&ty).unwrap();

        assert_eq!(strip_whitespace(&quote!(#ok).to_string()), "Output");
    }

    #[test]
    fn test_parse_credential_def_reads_markers_and_docs() {
        // Arrange
        let tokens = quote! {
            /// Microsoft identity platform
            MicrosoftCredential("microsoft") {
                /// Pre-acquired token
                #[optional]
                #[secret]
                access_token: Option<String>,
                tenant_id: String,
            }
        };

        // Act
        let def = parse_credential_def(tokens);

        // Assert
        assert_eq!(def.struct_name.to_string(), "MicrosoftCredential");
        assert_eq!(def.cred_name, "microsoft");
        assert_eq!(def.description.as_deref(), Some("Microsoft identity platform"));
        assert_eq!(def.fields.len(), 2);
        assert!(def.fields[0].optional);
        assert!(def.fields[0].secret);
        assert_eq!(def.fields[0].description.as_deref(), Some("Pre-acquired token"));
        assert!(!def.fields[1].optional);
        assert!(!def.fields[1].secret);
    }

    #[test]
    fn test_expand_credential_masks_secret_fields_in_debug() {
        let def = parse_credential_def(quote! {
            Api("api") {
                #[secret]
                key: String,
                region: String,
            }
        });

        let expanded = strip_whitespace(&expand_credential(&def).to_string());

        assert!(expanded.contains(".field(\"key\",&\"***\")"));
        assert!(expanded.contains(".field(\"region\",&self.region)"));
        assert!(expanded.contains("description:\"Credential:api\""));
        assert!(expanded.contains("secret:true"));
        assert!(expanded.contains("ctx.credential(\"api\")"));
    }
}
