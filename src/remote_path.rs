//! 远端路径的词法处理（SFTP 路径始终以 `/` 分隔，`\` 是普通文件名字符）。

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid path")]
    Invalid,
    #[error("invalid file name")]
    InvalidName,
}

/// 将请求路径规范化为远端绝对路径。
///
/// 空输入即根目录；`.` 与重复斜杠被折叠，`..` 直接拒绝。
pub fn normalize(raw: &str) -> Result<String, PathError> {
    let mut segments = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathError::Invalid),
            other if other.contains('\0') => return Err(PathError::Invalid),
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Ok("/".to_string());
    }
    Ok(format!("/{}", segments.join("/")))
}

pub fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// 规范化路径的父目录；根目录的父目录仍是根目录。
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(index) => &path[..index],
    }
}

pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// 校验单个路径段（重命名目标与上传文件名）。
pub fn validate_name(name: &str) -> Result<&str, PathError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\0'])
    {
        return Err(PathError::InvalidName);
    }
    Ok(name)
}

/// 将客户端提交的上传文件名截取为最后一段（兼容 Windows 路径）。
pub fn upload_file_name(raw: &str) -> Result<&str, PathError> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    validate_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_handles_root_and_slashes() {
        assert_eq!(normalize("").unwrap(), "/");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("docs//a.txt/").unwrap(), "/docs/a.txt");
        assert_eq!(normalize("/./docs").unwrap(), "/docs");
    }

    #[test]
    fn backslash_is_part_of_a_name() {
        assert_eq!(normalize("docs/a\\b.txt").unwrap(), "/docs/a\\b.txt");
        assert_eq!(validate_name("a\\b.txt"), Ok("a\\b.txt"));
        assert_eq!(validate_name("a/b"), Err(PathError::InvalidName));
    }

    #[test]
    fn normalize_rejects_parent_segments() {
        assert_eq!(normalize("/docs/../etc"), Err(PathError::Invalid));
    }

    #[test]
    fn parent_and_base_name() {
        assert_eq!(parent("/docs/a.txt"), "/docs");
        assert_eq!(parent("/a.txt"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(base_name("/docs/a.txt"), "a.txt");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/docs", "a"), "/docs/a");
    }

    #[test]
    fn upload_names_are_reduced_to_base_name() {
        assert_eq!(upload_file_name("C:\\Users\\me\\report.pdf").unwrap(), "report.pdf");
        assert_eq!(upload_file_name("../../x").unwrap(), "x");
        assert_eq!(upload_file_name(".."), Err(PathError::InvalidName));
        assert_eq!(upload_file_name(""), Err(PathError::InvalidName));
    }
}
