//! XML request bodies and response parsers
//!
//! Parsers use quick-xml's pull reader with byte-slice tag matching, so no
//! intermediate DOM is built.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt::Write as FmtWrite;

use crate::s3::error::{ErrorResponse, Result, S3Error};
use crate::s3::multipart::PartResult;
use crate::s3::types::{
    BucketInfo, CompleteMultipartUploadResponse, CreateMultipartUploadResponse, DeleteError,
    DeleteObjectsResponse, DeletedObject, ListMultipartUploadsResponse, ListObjectsResponse,
    ListPartsResponse, PartInfo, S3Object, UploadInfo,
};

pub const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Escape XML special characters into an existing buffer (no intermediate allocation)
pub fn xml_escape_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' => buf.push_str("&quot;"),
            '\'' => buf.push_str("&apos;"),
            _ => buf.push(ch),
        }
    }
}

/// `<name>escaped text</name>`
pub(crate) fn push_element(buf: &mut String, name: &str, text: &str) {
    buf.push('<');
    buf.push_str(name);
    buf.push('>');
    xml_escape_into(buf, text);
    buf.push_str("</");
    buf.push_str(name);
    buf.push('>');
}

/// Reader that keeps element text verbatim. Keys and markers may start or
/// end with spaces, so parsers clear their text buffer on every start tag
/// instead of trimming, which keeps indentation out of values.
pub(crate) fn new_reader(xml_data: &[u8]) -> Reader<&[u8]> {
    Reader::from_reader(xml_data)
}

fn strip_quotes(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

// =============================================================================
// Request bodies
// =============================================================================

/// CompleteMultipartUpload manifest; `parts` must already be sorted
pub fn complete_multipart_body(parts: &[PartResult]) -> String {
    let mut xml = String::with_capacity(parts.len() * 100 + 128);
    xml.push_str("<CompleteMultipartUploadResult xmlns=\"");
    xml.push_str(S3_NAMESPACE);
    xml.push_str("\">");
    for part in parts {
        xml.push_str("<Part><PartNumber>");
        let _ = write!(xml, "{}", part.part_number);
        xml.push_str("</PartNumber><ETag>\"");
        xml_escape_into(&mut xml, part.etag.trim_matches('"'));
        xml.push_str("\"</ETag>");
        if let Some(checksum) = &part.checksum {
            push_element(&mut xml, checksum.algorithm.xml_element(), &checksum.value);
        }
        xml.push_str("</Part>");
    }
    xml.push_str("</CompleteMultipartUploadResult>");
    xml
}

/// DeleteObjects body (quiet mode off, so deleted keys are reported)
pub fn delete_objects_body(keys: &[String]) -> String {
    let mut xml = String::with_capacity(keys.len() * 60 + 80);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Delete>");
    for key in keys {
        xml.push_str("<Object>");
        push_element(&mut xml, "Key", key);
        xml.push_str("</Object>");
    }
    xml.push_str("</Delete>");
    xml
}

/// CreateBucketConfiguration body for regions other than us-east-1
pub fn create_bucket_body(region: &str) -> String {
    let mut xml = String::with_capacity(160);
    xml.push_str("<CreateBucketConfiguration xmlns=\"");
    xml.push_str(S3_NAMESPACE);
    xml.push_str("\">");
    push_element(&mut xml, "LocationConstraint", region);
    xml.push_str("</CreateBucketConfiguration>");
    xml
}

// =============================================================================
// Response parsers
// =============================================================================

/// Parse an `<Error>` envelope. Returns None when the body is not one.
pub fn parse_error_response(xml_data: &[u8]) -> Option<ErrorResponse> {
    let mut reader = new_reader(xml_data);
    let mut response = ErrorResponse::default();
    let mut seen_root = false;
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_text.clear();
                if e.local_name().as_ref() == b"Error" {
                    seen_root = true;
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().ok()?);
            }
            Ok(Event::End(e)) => {
                let text = std::mem::take(&mut current_text);
                match e.local_name().as_ref() {
                    b"Code" => response.code = text,
                    b"Message" => response.message = text,
                    b"BucketName" => response.bucket_name = Some(text),
                    b"Key" => response.key = Some(text),
                    b"Resource" => response.resource = Some(text),
                    b"RequestId" => response.request_id = Some(text),
                    b"HostId" => response.host_id = Some(text),
                    b"Region" => response.region = Some(text),
                    b"Server" => response.server = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    if seen_root && !response.code.is_empty() {
        Some(response)
    } else {
        None
    }
}

/// Parse ListObjectsV2 XML response
pub fn parse_list_objects(xml_data: &[u8]) -> Result<ListObjectsResponse> {
    let mut reader = new_reader(xml_data);

    let mut response = ListObjectsResponse::default();
    let mut current_object: Option<S3Object> = None;
    let mut current_text = String::with_capacity(256);
    let mut in_common_prefixes = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_text.clear();
                match e.local_name().as_ref() {
                    b"Contents" => {
                        current_object = Some(S3Object::new(String::new(), 0));
                    }
                    b"CommonPrefixes" => {
                        in_common_prefixes = true;
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Key" => {
                        if let Some(ref mut obj) = current_object {
                            obj.key = std::mem::take(&mut current_text);
                        }
                    }
                    b"Size" => {
                        if let Some(ref mut obj) = current_object {
                            obj.size = current_text.parse().unwrap_or(0);
                        }
                    }
                    b"LastModified" => {
                        if let Some(ref mut obj) = current_object {
                            obj.last_modified = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"ETag" => {
                        if let Some(ref mut obj) = current_object {
                            obj.etag = Some(strip_quotes(&current_text));
                        }
                    }
                    b"StorageClass" => {
                        if let Some(ref mut obj) = current_object {
                            obj.storage_class = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Contents" => {
                        if let Some(obj) = current_object.take() {
                            response.contents.push(obj);
                        }
                    }
                    b"CommonPrefixes" => {
                        in_common_prefixes = false;
                    }
                    b"Prefix" => {
                        if in_common_prefixes {
                            response
                                .common_prefixes
                                .push(std::mem::take(&mut current_text));
                        }
                    }
                    b"IsTruncated" => {
                        response.is_truncated = current_text == "true";
                    }
                    b"NextContinuationToken" => {
                        response.next_continuation_token = Some(std::mem::take(&mut current_text));
                    }
                    b"EncodingType" => {
                        response.encoding_type = Some(std::mem::take(&mut current_text));
                    }
                    b"KeyCount" => {
                        response.key_count = current_text.parse().ok();
                    }
                    _ => {}
                }

                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    if response.encoding_type.as_deref() == Some("url") {
        for obj in &mut response.contents {
            obj.key = url_decode(&obj.key)?;
        }
        for prefix in &mut response.common_prefixes {
            *prefix = url_decode(prefix)?;
        }
    }

    Ok(response)
}

fn url_decode(s: &str) -> Result<String> {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .map_err(|e| S3Error::InvalidResponse(format!("invalid url-encoded key '{}': {}", s, e)))
}

/// Parse ListParts XML response
pub fn parse_list_parts(xml_data: &[u8]) -> Result<ListPartsResponse> {
    let mut reader = new_reader(xml_data);

    let mut response = ListPartsResponse::default();
    let mut current_part: Option<PartInfo> = None;
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_text.clear();
                if e.local_name().as_ref() == b"Part" {
                    current_part = Some(PartInfo {
                        part_number: 0,
                        etag: String::new(),
                        size: 0,
                        last_modified: None,
                    });
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match (e.local_name().as_ref(), current_part.as_mut()) {
                    (b"PartNumber", Some(part)) => {
                        part.part_number = parse_number(&current_text, "PartNumber")?;
                    }
                    (b"ETag", Some(part)) => part.etag = strip_quotes(&current_text),
                    (b"Size", Some(part)) => part.size = current_text.parse().unwrap_or(0),
                    (b"LastModified", Some(part)) => {
                        part.last_modified = Some(std::mem::take(&mut current_text));
                    }
                    (b"Part", _) => {
                        if let Some(part) = current_part.take() {
                            response.parts.push(part);
                        }
                    }
                    (b"IsTruncated", None) => response.is_truncated = current_text == "true",
                    (b"NextPartNumberMarker", None) => {
                        response.next_part_number_marker = current_text.parse().ok();
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(response)
}

/// Parse ListMultipartUploads XML response
pub fn parse_list_multipart_uploads(xml_data: &[u8]) -> Result<ListMultipartUploadsResponse> {
    let mut reader = new_reader(xml_data);

    let mut response = ListMultipartUploadsResponse::default();
    let mut current_upload: Option<UploadInfo> = None;
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_text.clear();
                if e.local_name().as_ref() == b"Upload" {
                    current_upload = Some(UploadInfo {
                        key: String::new(),
                        upload_id: String::new(),
                        initiated: None,
                        storage_class: None,
                    });
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match (e.local_name().as_ref(), current_upload.as_mut()) {
                    (b"Key", Some(upload)) => upload.key = std::mem::take(&mut current_text),
                    (b"UploadId", Some(upload)) => {
                        upload.upload_id = std::mem::take(&mut current_text);
                    }
                    (b"Initiated", Some(upload)) => {
                        upload.initiated = Some(std::mem::take(&mut current_text));
                    }
                    (b"StorageClass", Some(upload)) => {
                        upload.storage_class = Some(std::mem::take(&mut current_text));
                    }
                    (b"Upload", _) => {
                        if let Some(upload) = current_upload.take() {
                            response.uploads.push(upload);
                        }
                    }
                    (b"IsTruncated", None) => response.is_truncated = current_text == "true",
                    (b"NextKeyMarker", None) => {
                        response.next_key_marker = Some(std::mem::take(&mut current_text));
                    }
                    (b"NextUploadIdMarker", None) => {
                        response.next_upload_id_marker = Some(std::mem::take(&mut current_text));
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(response)
}

/// Parse ListAllMyBucketsResult
pub fn parse_list_buckets(xml_data: &[u8]) -> Result<Vec<BucketInfo>> {
    let mut reader = new_reader(xml_data);

    let mut buckets = Vec::new();
    let mut current: Option<BucketInfo> = None;
    let mut current_text = String::with_capacity(64);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_text.clear();
                if e.local_name().as_ref() == b"Bucket" {
                    current = Some(BucketInfo {
                        name: String::new(),
                        creation_date: None,
                    });
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match (e.local_name().as_ref(), current.as_mut()) {
                    (b"Name", Some(bucket)) => bucket.name = std::mem::take(&mut current_text),
                    (b"CreationDate", Some(bucket)) => {
                        bucket.creation_date = Some(std::mem::take(&mut current_text));
                    }
                    (b"Bucket", _) => {
                        if let Some(bucket) = current.take() {
                            buckets.push(bucket);
                        }
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(buckets)
}

/// Parse CreateMultipartUpload XML response
pub fn parse_create_multipart(xml_data: &[u8]) -> Result<CreateMultipartUploadResponse> {
    let mut reader = new_reader(xml_data);

    let mut bucket = String::new();
    let mut key = String::new();
    let mut upload_id = String::new();
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => current_text.clear(),
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Bucket" => bucket = std::mem::take(&mut current_text),
                    b"Key" => key = std::mem::take(&mut current_text),
                    b"UploadId" => upload_id = std::mem::take(&mut current_text),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    if upload_id.is_empty() {
        return Err(S3Error::InvalidResponse("Missing UploadId in response".to_string()));
    }

    Ok(CreateMultipartUploadResponse {
        bucket,
        key,
        upload_id,
    })
}

/// Parse CompleteMultipartUpload XML response
pub fn parse_complete_multipart(xml_data: &[u8]) -> Result<CompleteMultipartUploadResponse> {
    let mut reader = new_reader(xml_data);

    let mut location = None;
    let mut bucket = String::new();
    let mut key = String::new();
    let mut etag = String::new();
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => current_text.clear(),
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Location" => location = Some(std::mem::take(&mut current_text)),
                    b"Bucket" => bucket = std::mem::take(&mut current_text),
                    b"Key" => key = std::mem::take(&mut current_text),
                    b"ETag" => etag = strip_quotes(&current_text),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(CompleteMultipartUploadResponse {
        location,
        bucket,
        key,
        etag,
    })
}

/// Parse DeleteObjects XML response
pub fn parse_delete_result(xml_data: &[u8]) -> Result<DeleteObjectsResponse> {
    let mut reader = new_reader(xml_data);

    let mut response = DeleteObjectsResponse::default();
    let mut current_deleted: Option<DeletedObject> = None;
    let mut current_error: Option<DeleteError> = None;
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_text.clear();
                match e.local_name().as_ref() {
                    b"Deleted" => {
                        current_deleted = Some(DeletedObject::new(String::new()));
                    }
                    b"Error" => {
                        current_error = Some(DeleteError::default());
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Key" => {
                        if let Some(ref mut deleted) = current_deleted {
                            deleted.key = std::mem::take(&mut current_text);
                        } else if let Some(ref mut error) = current_error {
                            error.key = std::mem::take(&mut current_text);
                        }
                    }
                    b"VersionId" => {
                        if let Some(ref mut deleted) = current_deleted {
                            deleted.version_id = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Code" => {
                        if let Some(ref mut error) = current_error {
                            error.code = std::mem::take(&mut current_text);
                        }
                    }
                    b"Message" => {
                        if let Some(ref mut error) = current_error {
                            error.message = std::mem::take(&mut current_text);
                        }
                    }
                    b"Deleted" => {
                        if let Some(deleted) = current_deleted.take() {
                            response.deleted.push(deleted);
                        }
                    }
                    b"Error" => {
                        if let Some(error) = current_error.take() {
                            response.errors.push(error);
                        }
                    }
                    _ => {}
                }

                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(response)
}

pub(crate) fn parse_number<T: std::str::FromStr>(text: &str, element: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| S3Error::XmlParse(format!("invalid {} value '{}'", element, text)))
}
